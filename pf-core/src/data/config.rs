//! Static acquisition configuration
//!
//! Loaded once from JSON at startup (or taken from the compiled-in tables)
//! and turned into one [`DeviceTable`] per bus. Calibration words are
//! carried through exactly as written; scale factors only come from
//! `current_lsb`/`power_lsb` or from the shunt resistance.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pf_error::{PowerFetcherError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::types::{CurrentScale, DeviceDescriptor, DeviceTable};
use super::validation;
use crate::constants::{bus, ina226, paths, timing};

/// One slot entry of a bus in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    /// Absent means the slot is unpopulated
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default = "default_configuration_word")]
    pub configuration_word: u16,
    #[serde(default)]
    pub calibration_word: u16,
    #[serde(default)]
    pub component_tag: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_lsb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_lsb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shunt_resistance_ohms: Option<f64>,
}

impl SlotEntry {
    /// Entry with the default configuration word and no scale
    pub fn new(address: u8, component_tag: char, calibration_word: u16) -> Self {
        Self {
            address: Some(address),
            configuration_word: default_configuration_word(),
            calibration_word,
            component_tag: Some(component_tag),
            current_lsb: None,
            power_lsb: None,
            shunt_resistance_ohms: None,
        }
    }

    pub fn with_current_lsb(mut self, current_lsb: f64) -> Self {
        self.current_lsb = Some(current_lsb);
        self
    }

    pub fn with_power_lsb(mut self, power_lsb: f64) -> Self {
        self.power_lsb = Some(power_lsb);
        self
    }

    pub fn with_shunt_resistance(mut self, ohms: f64) -> Self {
        self.shunt_resistance_ohms = Some(ohms);
        self
    }

    /// Scale factors for this entry, when they can be determined
    ///
    /// `current_lsb` wins over the shunt resistance. The shunt relation
    /// needs a non-zero calibration word.
    pub fn scale(&self) -> Option<CurrentScale> {
        let current_lsb = match (self.current_lsb, self.shunt_resistance_ohms) {
            (Some(lsb), _) => lsb,
            (None, Some(r)) if self.calibration_word != 0 => {
                ina226::CALIBRATION_SCALE / (self.calibration_word as f64 * r)
            }
            _ => return None,
        };
        Some(match self.power_lsb {
            Some(power_lsb) => CurrentScale::new(current_lsb, power_lsb),
            None => CurrentScale::from_current_lsb(current_lsb),
        })
    }

    fn validate(&self, field: &str) -> Result<Option<DeviceDescriptor>> {
        let address = match self.address {
            Some(address) => validation::validate_address(&format!("{}.address", field), address)?,
            None => return Ok(None),
        };
        let component_tag = self.component_tag.ok_or_else(|| {
            PowerFetcherError::invalid_config(
                format!("{}.component_tag", field),
                "populated slot needs a component tag",
            )
        })?;
        if let Some(lsb) = self.current_lsb {
            validation::validate_positive(&format!("{}.current_lsb", field), lsb)?;
        }
        if let Some(lsb) = self.power_lsb {
            validation::validate_positive(&format!("{}.power_lsb", field), lsb)?;
        }
        if let Some(r) = self.shunt_resistance_ohms {
            validation::validate_positive(&format!("{}.shunt_resistance_ohms", field), r)?;
        }

        Ok(Some(
            DeviceDescriptor::new(address, component_tag)
                .with_configuration_word(self.configuration_word)
                .with_calibration(self.calibration_word, self.scale()),
        ))
    }
}

/// One bus in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub index: u8,
    /// Device node; `/dev/i2c-<index>` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
    #[serde(default)]
    pub slots: Vec<Option<SlotEntry>>,
}

impl BusConfig {
    pub fn new(index: u8, slots: Vec<Option<SlotEntry>>) -> Self {
        Self {
            index,
            device: None,
            slots,
        }
    }

    pub fn device_path(&self) -> PathBuf {
        self.device
            .clone()
            .unwrap_or_else(|| paths::i2c_device_path(self.index))
    }

    /// Validate the entries and build the slot table
    pub fn device_table(&self) -> Result<DeviceTable> {
        let field = format!("buses[{}].slots", self.index);
        validation::validate_slot_count(&field, self.slots.len())?;

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.slots.len());
        for (i, entry) in self.slots.iter().enumerate() {
            let descriptor = match entry {
                Some(entry) => entry.validate(&format!("{}[{}]", field, i))?,
                None => None,
            };
            if let Some(d) = &descriptor {
                if !seen.insert(d.address) {
                    return Err(PowerFetcherError::DuplicateAddress {
                        bus: self.index,
                        address: d.address,
                    });
                }
            }
            descriptors.push(descriptor);
        }
        Ok(DeviceTable::from_descriptors(descriptors))
    }
}

/// Complete acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_clock_frequency_hz")]
    pub clock_frequency_hz: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    /// Manufacturer id a device must report to count as present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_manufacturer_id: Option<u16>,
    /// One worker per bus instead of a single worker for all buses
    #[serde(default = "default_per_bus_workers")]
    pub per_bus_workers: bool,
    #[serde(default = "default_stats_interval_s")]
    pub stats_interval_s: u64,
    #[serde(default)]
    pub buses: Vec<BusConfig>,
}

fn default_configuration_word() -> u16 {
    ina226::DEFAULT_CONFIGURATION_WORD
}

fn default_clock_frequency_hz() -> u32 {
    bus::DEFAULT_CLOCK_FREQUENCY_HZ
}

fn default_poll_interval_ms() -> u64 {
    timing::DEFAULT_POLL_INTERVAL_MS
}

fn default_scan_interval_ms() -> u64 {
    timing::DEFAULT_SCAN_INTERVAL_MS
}

fn default_transaction_timeout_ms() -> u64 {
    bus::DEFAULT_TRANSACTION_TIMEOUT_MS
}

fn default_per_bus_workers() -> bool {
    true
}

fn default_stats_interval_s() -> u64 {
    timing::DEFAULT_STATS_INTERVAL_S
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            clock_frequency_hz: default_clock_frequency_hz(),
            poll_interval_ms: default_poll_interval_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            expected_manufacturer_id: None,
            per_bus_workers: default_per_bus_workers(),
            stats_interval_s: default_stats_interval_s(),
            buses: Vec::new(),
        }
    }
}

impl AcquisitionConfig {
    /// The compiled-in tables of the deployed boards
    ///
    /// Only the 0x0D55 rails have a known scale; every other slot reads as
    /// uncalibrated until a configuration file supplies its `current_lsb`.
    pub fn builtin() -> Self {
        const BUS0: [(u8, char, u16); 6] = [
            (0x40, 'H', 0x0D55),
            (0x41, 'I', 0x0D55),
            (0x42, 'J', 0x0A00),
            (0x43, 'K', 0x0A00),
            (0x44, 'L', 0x3348),
            (0x45, 'M', 0x3348),
        ];
        const BUS1: [(u8, char, u16); 6] = [
            (0x40, 'A', 0x0F62),
            (0x41, 'B', 0x0F62),
            (0x42, 'C', 0x0F62),
            (0x43, 'D', 0x0F62),
            (0x44, 'E', 0x3348),
            (0x45, 'F', 0x3348),
        ];
        const KNOWN_LSB_0D55: f64 = 0.0005;

        let slots = |table: &[(u8, char, u16)]| -> Vec<Option<SlotEntry>> {
            table
                .iter()
                .map(|&(address, tag, cal)| {
                    let entry = SlotEntry::new(address, tag, cal);
                    Some(if cal == 0x0D55 {
                        entry.with_current_lsb(KNOWN_LSB_0D55)
                    } else {
                        entry
                    })
                })
                .collect()
        };

        Self {
            buses: vec![
                BusConfig::new(0, slots(&BUS0)),
                BusConfig::new(1, slots(&BUS1)),
                BusConfig::new(2, Vec::new()),
            ],
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_s)
    }

    /// Check every field and every bus table
    pub fn validate(&self) -> Result<()> {
        validation::validate_interval_ms("poll_interval_ms", self.poll_interval_ms)?;
        validation::validate_interval_ms("scan_interval_ms", self.scan_interval_ms)?;
        validation::validate_interval_ms("transaction_timeout_ms", self.transaction_timeout_ms)?;
        if self.clock_frequency_hz == 0 {
            return Err(PowerFetcherError::invalid_config(
                "clock_frequency_hz",
                "must be greater than zero",
            ));
        }

        let mut indices = HashSet::new();
        for bus in &self.buses {
            if !indices.insert(bus.index) {
                return Err(PowerFetcherError::invalid_config(
                    "buses",
                    format!("bus index {} listed twice", bus.index),
                ));
            }
            bus.device_table()?;
        }
        Ok(())
    }

    /// Validated slot tables, one per configured bus
    pub fn device_tables(&self) -> Result<Vec<(BusConfig, DeviceTable)>> {
        self.validate()?;
        self.buses
            .iter()
            .map(|bus| Ok((bus.clone(), bus.device_table()?)))
            .collect()
    }
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<AcquisitionConfig> {
    validation::validate_config_file(path)?;

    let contents = fs::read_to_string(path).map_err(|e| PowerFetcherError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: AcquisitionConfig = serde_json::from_str(&contents)?;
    config.validate()?;

    info!("Loaded configuration for {} buses from {:?}", config.buses.len(), path);
    Ok(config)
}

/// Load the configuration file if it exists, otherwise the built-in tables
pub fn load_config_or_builtin(path: &Path) -> Result<AcquisitionConfig> {
    if !path.exists() {
        warn!("{} not found, using built-in bus tables", path.display());
        return Ok(AcquisitionConfig::builtin());
    }
    load_config(path)
}
