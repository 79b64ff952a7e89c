//! Data modules
//!
//! Contains data types, configuration loading, and validation.

pub mod config;
pub mod config_word;
pub mod types;
pub mod validation;

pub use config::{load_config, load_config_or_builtin, AcquisitionConfig, BusConfig, SlotEntry};
pub use config_word::{device_address, AddressPin, ConfigurationWord, OperatingMode};
pub use types::{CurrentScale, DeviceDescriptor, DeviceTable, Measurement, MeasurementRecord, Slot};
