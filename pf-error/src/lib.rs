//! Unified error handling for power-fetcher
//!
//! This crate provides the error types shared by the core library and the daemon.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.
//!
//! Three layers:
//! - [`BusError`] - a single transaction on the bus failed (transport level)
//! - [`ReadError`] - a calibrated slot read could not produce a measurement
//! - [`PowerFetcherError`] - everything else (configuration, I/O, setup)

use std::io;
use std::path::PathBuf;

/// Result type alias using PowerFetcherError
pub type Result<T> = std::result::Result<T, PowerFetcherError>;

/// Transport-level failure of one bus transaction
///
/// Always recoverable: the affected slot is marked offline and the next
/// scan decides whether it comes back.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("device at 0x{address:02X} did not acknowledge")]
    Nack { address: u8 },

    #[error("transaction with 0x{address:02X} timed out")]
    Timeout { address: u8 },

    #[error("short transfer with 0x{address:02X}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        address: u8,
        expected: usize,
        actual: usize,
    },

    #[error("bus {bus} unavailable: {reason}")]
    Unavailable { bus: u8, reason: String },

    #[error("bus I/O error: {0}")]
    Io(String),
}

impl BusError {
    /// Whether this error is a timeout (the device may simply be slow or absent)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of a calibrated read on one slot
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("slot {slot} on bus {bus} is unpopulated, offline or not yet configured")]
    InvalidSlot { bus: u8, slot: usize },

    #[error("slot {slot} on bus {bus} has no usable calibration")]
    Uncalibrated { bus: u8, slot: usize },

    #[error("transport error: {0}")]
    Transport(#[from] BusError),
}

impl ReadError {
    /// Short machine-readable kind, used in measurement records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSlot { .. } => "invalid_slot",
            Self::Uncalibrated { .. } => "uncalibrated",
            Self::Transport(_) => "transport",
        }
    }
}

/// Unified error type for all power-fetcher operations
#[derive(thiserror::Error, Debug)]
pub enum PowerFetcherError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Bus and Device Errors
    // ============================================================================
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Configuration write to {register} register failed on bus {bus} slot {slot}: {source}")]
    ConfigurationWriteFailed {
        bus: u8,
        slot: usize,
        register: &'static str,
        source: BusError,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Duplicate device address 0x{address:02X} on bus {bus}")]
    DuplicateAddress {
        bus: u8,
        address: u8,
    },
}

impl PowerFetcherError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
