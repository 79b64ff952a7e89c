//! Input validation for configuration values
//!
//! Every value read from a configuration file passes through here before it
//! reaches a device table. Errors name the offending field by its JSON path
//! (`buses[1].slots[3].address`) so operators can find it.

use std::path::Path;

use pf_error::{PowerFetcherError, Result};

use crate::constants::bus::{MAX_DEVICE_ADDRESS, MIN_DEVICE_ADDRESS};
use crate::constants::ina226::SLOTS_PER_BUS;
use crate::constants::paths::MAX_CONFIG_FILE_SIZE;

/// Validates a 7-bit device address outside the reserved ranges
pub fn validate_address(field: &str, address: u8) -> Result<u8> {
    if !(MIN_DEVICE_ADDRESS..=MAX_DEVICE_ADDRESS).contains(&address) {
        return Err(PowerFetcherError::invalid_config(
            field,
            format!(
                "address 0x{:02X} outside 0x{:02X}..=0x{:02X}",
                address, MIN_DEVICE_ADDRESS, MAX_DEVICE_ADDRESS
            ),
        ));
    }
    Ok(address)
}

/// Validates a strictly positive, finite scale value
pub fn validate_positive(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PowerFetcherError::invalid_config(
            field,
            format!("{} must be positive and finite", value),
        ));
    }
    Ok(value)
}

/// Validates a non-zero interval in milliseconds
pub fn validate_interval_ms(field: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(PowerFetcherError::invalid_config(field, "must be greater than zero"));
    }
    Ok(value)
}

/// Validates the number of slot entries of one bus
pub fn validate_slot_count(field: &str, count: usize) -> Result<()> {
    if count > SLOTS_PER_BUS {
        return Err(PowerFetcherError::invalid_config(
            field,
            format!("{} entries, at most {} allowed", count, SLOTS_PER_BUS),
        ));
    }
    Ok(())
}

/// Validates that a configuration file exists and has a sane size
pub fn validate_config_file(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PowerFetcherError::FileNotFound(path.to_path_buf())
        } else {
            PowerFetcherError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    if !metadata.is_file() {
        return Err(PowerFetcherError::config(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(PowerFetcherError::config(format!(
            "{} is {} bytes, limit is {}",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }

    Ok(())
}
