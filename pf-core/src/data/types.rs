//! Core data types: device descriptors, slot tables and measurements

use serde::{Deserialize, Serialize};

use crate::constants::ina226::{POWER_LSB_PER_CURRENT_LSB, SLOTS_PER_BUS};

/// Physical scale behind a calibration word
///
/// `current_lsb` is amperes per count of the current register and
/// `power_lsb` is watts per count of the power register.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentScale {
    pub current_lsb: f64,
    pub power_lsb: f64,
}

impl CurrentScale {
    /// Scale with the power LSB derived from the current LSB
    pub fn from_current_lsb(current_lsb: f64) -> Self {
        Self {
            current_lsb,
            power_lsb: current_lsb * POWER_LSB_PER_CURRENT_LSB,
        }
    }

    pub fn new(current_lsb: f64, power_lsb: f64) -> Self {
        Self {
            current_lsb,
            power_lsb,
        }
    }

    /// Both LSBs are finite and strictly positive
    pub fn is_usable(&self) -> bool {
        self.current_lsb.is_finite()
            && self.current_lsb > 0.0
            && self.power_lsb.is_finite()
            && self.power_lsb > 0.0
    }
}

/// Static description of one populated slot
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// 7-bit bus address
    pub address: u8,
    /// Value written to the configuration register
    pub configuration_word: u16,
    /// Value written to the calibration register; 0 means uncalibrated
    pub calibration_word: u16,
    /// Scale the calibration word was derived for, when known
    pub scale: Option<CurrentScale>,
    /// Label naming the supply rail
    pub component_tag: char,
}

impl DeviceDescriptor {
    pub fn new(address: u8, component_tag: char) -> Self {
        Self {
            address,
            configuration_word: crate::constants::ina226::DEFAULT_CONFIGURATION_WORD,
            calibration_word: 0,
            scale: None,
            component_tag,
        }
    }

    pub fn with_configuration_word(mut self, word: u16) -> Self {
        self.configuration_word = word;
        self
    }

    pub fn with_calibration(mut self, calibration_word: u16, scale: Option<CurrentScale>) -> Self {
        self.calibration_word = calibration_word;
        self.scale = scale;
        self
    }

    /// A non-zero calibration word with a usable scale
    pub fn is_calibrated(&self) -> bool {
        self.calibration_word != 0 && self.scale.map_or(false, |s| s.is_usable())
    }
}

/// One position in a bus's device table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slot {
    /// `None` when nothing is expected at this position
    pub descriptor: Option<DeviceDescriptor>,
    /// Result of the most recent scan
    pub online: bool,
}

impl Slot {
    pub fn populated(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor: Some(descriptor),
            online: false,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Fixed-size slot table of one bus
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTable {
    slots: [Slot; SLOTS_PER_BUS],
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }
}

impl DeviceTable {
    /// Empty table with every slot unpopulated
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table populated from descriptors in slot order
    ///
    /// Entries beyond [`SLOTS_PER_BUS`] are ignored; callers validate
    /// the length before building.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Option<DeviceDescriptor>>,
    {
        let mut table = Self::default();
        for (slot, descriptor) in table.slots.iter_mut().zip(descriptors) {
            slot.descriptor = descriptor;
        }
        table
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Indices of populated slots
    pub fn populated(&self) -> impl Iterator<Item = (usize, &DeviceDescriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.descriptor.as_ref().map(|d| (i, d)))
    }

    /// Indices of populated slots that answered the last scan
    pub fn online_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.online && s.descriptor.is_some())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn populated_count(&self) -> usize {
        self.populated().count()
    }
}

/// Calibrated reading of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub bus_index: u8,
    pub slot_index: usize,
    pub component_tag: char,
    /// Volts
    pub bus_voltage: f64,
    /// Volts
    pub shunt_voltage: f64,
    /// Amperes
    pub current: f64,
    /// Watts
    pub power: f64,
    /// Microseconds since the Unix epoch
    pub timestamp_us: u64,
}

/// One entry of an acquisition cycle: a measurement or an explicit failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MeasurementRecord {
    Ok(Measurement),
    Failed {
        bus_index: u8,
        slot_index: usize,
        component_tag: char,
        timestamp_us: u64,
        kind: String,
        reason: String,
    },
}

impl MeasurementRecord {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn bus_index(&self) -> u8 {
        match self {
            Self::Ok(m) => m.bus_index,
            Self::Failed { bus_index, .. } => *bus_index,
        }
    }

    pub fn slot_index(&self) -> usize {
        match self {
            Self::Ok(m) => m.slot_index,
            Self::Failed { slot_index, .. } => *slot_index,
        }
    }

    pub fn component_tag(&self) -> char {
        match self {
            Self::Ok(m) => m.component_tag,
            Self::Failed { component_tag, .. } => *component_tag,
        }
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        match self {
            Self::Ok(m) => Some(m),
            Self::Failed { .. } => None,
        }
    }
}

/// Microseconds since the Unix epoch
pub fn timestamp_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
