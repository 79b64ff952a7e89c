//! Configuration register composition and address strapping

use std::fmt;

use pf_error::{PowerFetcherError, Result};
use serde::{Deserialize, Serialize};

use crate::constants::bus::INA226_BASE_ADDRESS;
use crate::constants::ina226::DEFAULT_CONFIGURATION_WORD;

const AVERAGING_COUNTS: [u16; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];
const CONVERSION_TIMES_US: [u16; 8] = [140, 204, 332, 588, 1100, 2116, 4156, 8244];

const AVERAGING_SHIFT: u16 = 9;
const BUS_CONVERSION_SHIFT: u16 = 6;
const SHUNT_CONVERSION_SHIFT: u16 = 3;
const FIELD_MASK: u16 = 0b111;

/// Operating mode, bits 2..0 of the configuration register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    PowerDown,
    ShuntTriggered,
    BusTriggered,
    ShuntAndBusTriggered,
    ShuntContinuous,
    BusContinuous,
    ShuntAndBusContinuous,
}

impl OperatingMode {
    pub const fn bits(self) -> u16 {
        match self {
            Self::PowerDown => 0b000,
            Self::ShuntTriggered => 0b001,
            Self::BusTriggered => 0b010,
            Self::ShuntAndBusTriggered => 0b011,
            Self::ShuntContinuous => 0b101,
            Self::BusContinuous => 0b110,
            Self::ShuntAndBusContinuous => 0b111,
        }
    }

    pub fn from_bits(bits: u16) -> Self {
        match bits & FIELD_MASK {
            0b001 => Self::ShuntTriggered,
            0b010 => Self::BusTriggered,
            0b011 => Self::ShuntAndBusTriggered,
            0b101 => Self::ShuntContinuous,
            0b110 => Self::BusContinuous,
            0b111 => Self::ShuntAndBusContinuous,
            // 0b100 is a second power-down encoding
            _ => Self::PowerDown,
        }
    }
}

/// Typed view of a configuration register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationWord {
    /// Samples averaged per result
    pub averaging: u16,
    /// Bus-voltage conversion time in microseconds
    pub bus_conversion_us: u16,
    /// Shunt-voltage conversion time in microseconds
    pub shunt_conversion_us: u16,
    pub mode: OperatingMode,
}

impl ConfigurationWord {
    /// No averaging, 140 µs conversions, continuous shunt and bus
    pub const DEFAULT: u16 = DEFAULT_CONFIGURATION_WORD;

    /// Compose a register value from typed fields
    pub fn build(
        averaging: u16,
        bus_conversion_us: u16,
        shunt_conversion_us: u16,
        mode: OperatingMode,
    ) -> Result<u16> {
        let avg = field_code(&AVERAGING_COUNTS, averaging, "averaging")?;
        let vbus = field_code(&CONVERSION_TIMES_US, bus_conversion_us, "bus_conversion_us")?;
        let vsh = field_code(&CONVERSION_TIMES_US, shunt_conversion_us, "shunt_conversion_us")?;

        Ok((avg << AVERAGING_SHIFT)
            | (vbus << BUS_CONVERSION_SHIFT)
            | (vsh << SHUNT_CONVERSION_SHIFT)
            | mode.bits())
    }

    /// Recover the typed fields; bits 15..12 are ignored
    pub fn decode(word: u16) -> Self {
        let code = |shift: u16| ((word >> shift) & FIELD_MASK) as usize;
        Self {
            averaging: AVERAGING_COUNTS[code(AVERAGING_SHIFT)],
            bus_conversion_us: CONVERSION_TIMES_US[code(BUS_CONVERSION_SHIFT)],
            shunt_conversion_us: CONVERSION_TIMES_US[code(SHUNT_CONVERSION_SHIFT)],
            mode: OperatingMode::from_bits(word),
        }
    }

    pub fn encode(&self) -> Result<u16> {
        Self::build(
            self.averaging,
            self.bus_conversion_us,
            self.shunt_conversion_us,
            self.mode,
        )
    }
}

impl fmt::Display for ConfigurationWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg={} vbus={}us vsh={}us mode={:?}",
            self.averaging, self.bus_conversion_us, self.shunt_conversion_us, self.mode
        )
    }
}

fn field_code(table: &[u16; 8], value: u16, field: &str) -> Result<u16> {
    table
        .iter()
        .position(|&v| v == value)
        .map(|i| i as u16)
        .ok_or_else(|| {
            PowerFetcherError::invalid_config(
                field,
                format!("{} is not one of {:?}", value, table),
            )
        })
}

/// Connection of an A0/A1 address pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPin {
    Gnd,
    Vs,
    Sda,
    Scl,
}

impl AddressPin {
    const fn code(self) -> u8 {
        match self {
            Self::Gnd => 0,
            Self::Vs => 1,
            Self::Sda => 2,
            Self::Scl => 3,
        }
    }
}

/// 7-bit address selected by the A1/A0 strapping
pub const fn device_address(a1: AddressPin, a0: AddressPin) -> u8 {
    INA226_BASE_ADDRESS | (a1.code() << 2) | a0.code()
}
