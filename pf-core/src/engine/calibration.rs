//! Calibration engine
//!
//! Converts raw register values into physical units using the scale stored
//! with each slot. The calibration word programmed into the chip is never
//! changed here; a slot without a usable scale is refused.

use pf_error::{PowerFetcherError, ReadError, Result};

use crate::constants::ina226::{
    BUS_VOLTAGE_LSB_V, CALIBRATION_MAX, CALIBRATION_SCALE, CURRENT_REGISTER_MAX,
    SHUNT_FULL_SCALE_V, SHUNT_VOLTAGE_LSB_V,
};
use crate::data::types::{CurrentScale, DeviceDescriptor};

/// Raw values of the four measurement registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRegisters {
    pub bus_voltage: u16,
    pub shunt_voltage: u16,
    pub current: u16,
    pub power: u16,
}

/// Physical values of one reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Volts
    pub bus_voltage: f64,
    /// Volts
    pub shunt_voltage: f64,
    /// Amperes
    pub current: f64,
    /// Watts
    pub power: f64,
}

/// Scale to use for a slot, or [`ReadError::Uncalibrated`]
pub fn scale_for(
    bus: u8,
    slot: usize,
    descriptor: &DeviceDescriptor,
) -> std::result::Result<CurrentScale, ReadError> {
    if descriptor.calibration_word == 0 {
        return Err(ReadError::Uncalibrated { bus, slot });
    }
    descriptor
        .scale
        .filter(CurrentScale::is_usable)
        .ok_or(ReadError::Uncalibrated { bus, slot })
}

/// Bus voltage in volts (unsigned, 1.25 mV per count)
pub fn bus_voltage(raw: u16) -> f64 {
    raw as f64 * BUS_VOLTAGE_LSB_V
}

/// Shunt voltage in volts (two's complement, 2.5 µV per count)
pub fn shunt_voltage(raw: u16) -> f64 {
    raw as i16 as f64 * SHUNT_VOLTAGE_LSB_V
}

/// Current in amperes (two's complement)
pub fn current(raw: u16, scale: &CurrentScale) -> f64 {
    raw as i16 as f64 * scale.current_lsb
}

/// Power in watts (unsigned)
pub fn power(raw: u16, scale: &CurrentScale) -> f64 {
    raw as f64 * scale.power_lsb
}

/// Convert all four registers
pub fn convert(raw: &RawRegisters, scale: &CurrentScale) -> Reading {
    Reading {
        bus_voltage: bus_voltage(raw.bus_voltage),
        shunt_voltage: shunt_voltage(raw.shunt_voltage),
        current: current(raw.current, scale),
        power: power(raw.power, scale),
    }
}

/// Scale factors chosen for a shunt resistor
///
/// Sized so the full-scale shunt voltage maps onto the full positive range
/// of the current register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RailDesign {
    pub shunt_resistance_ohms: f64,
    /// Amperes at full-scale shunt voltage
    pub max_current: f64,
    pub current_lsb: f64,
    pub calibration_word: u16,
}

impl RailDesign {
    pub fn from_shunt(shunt_resistance_ohms: f64) -> Result<Self> {
        if !shunt_resistance_ohms.is_finite() || shunt_resistance_ohms <= 0.0 {
            return Err(PowerFetcherError::invalid_config(
                "shunt_resistance_ohms",
                format!("{} must be positive and finite", shunt_resistance_ohms),
            ));
        }

        let max_current = SHUNT_FULL_SCALE_V / shunt_resistance_ohms;
        let current_lsb = max_current / CURRENT_REGISTER_MAX;
        let word = (CALIBRATION_SCALE / (current_lsb * shunt_resistance_ohms)).trunc();

        if !(1.0..=CALIBRATION_MAX as f64).contains(&word) {
            return Err(PowerFetcherError::invalid_config(
                "shunt_resistance_ohms",
                format!("calibration word {} does not fit 15 bits", word),
            ));
        }

        Ok(Self {
            shunt_resistance_ohms,
            max_current,
            current_lsb,
            calibration_word: word as u16,
        })
    }

    /// Scale matching this design, with the default power ratio
    pub fn scale(&self) -> CurrentScale {
        CurrentScale::from_current_lsb(self.current_lsb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ina226::CURRENT_REGISTER_DIVISOR;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_current_from_known_lsb() {
        let scale = CurrentScale::from_current_lsb(0.0005);
        assert!(close(current(0x0100, &scale), 0.128));
    }

    #[test]
    fn test_negative_current() {
        let scale = CurrentScale::from_current_lsb(0.001);
        assert!(close(current(0xFFFF, &scale), -0.001));
        assert!(close(current(0x8000, &scale), -32.768));
    }

    #[test]
    fn test_voltages() {
        assert!(close(bus_voltage(0x2580), 12.0));
        assert!(close(shunt_voltage(0x0190), 0.001));
        assert!(close(shunt_voltage(0xFE70), -0.001));
    }

    #[test]
    fn test_power_uses_power_lsb() {
        let scale = CurrentScale::new(0.001, 0.025);
        assert!(close(power(400, &scale), 10.0));
        let derived = CurrentScale::from_current_lsb(0.001);
        assert!(close(power(400, &derived), 8.0));
    }

    #[test]
    fn test_scale_for_refuses_uncalibrated() {
        let d = DeviceDescriptor::new(0x40, 'H');
        assert_eq!(scale_for(0, 0, &d), Err(ReadError::Uncalibrated { bus: 0, slot: 0 }));

        let no_scale = d.clone().with_calibration(0x0A00, None);
        assert!(scale_for(0, 2, &no_scale).is_err());

        let zero_word = d
            .clone()
            .with_calibration(0, Some(CurrentScale::from_current_lsb(0.001)));
        assert!(scale_for(0, 3, &zero_word).is_err());

        let good = d.with_calibration(0x0D55, Some(CurrentScale::from_current_lsb(0.0005)));
        assert!(scale_for(0, 0, &good).is_ok());
    }

    #[test]
    fn test_calibration_round_trip_within_one_lsb() {
        // 0.00512 / (0.001 A * 0.002 ohm) = 2560, an exact word
        let lsb = 0.001;
        let r_shunt = 0.002;
        let cal: i64 = 2560;
        let scale = CurrentScale::from_current_lsb(lsb);

        for amps in [0.25_f64, 1.0, 3.3, 7.77, 12.5] {
            let shunt_raw = (amps * r_shunt / SHUNT_VOLTAGE_LSB_V).round() as i64;
            let current_raw = (shunt_raw * cal).div_euclid(CURRENT_REGISTER_DIVISOR);
            let measured = current(current_raw as u16, &scale);
            assert!(
                (measured - amps).abs() <= lsb + 1e-9,
                "{} A measured as {} A",
                amps,
                measured
            );
        }
    }

    #[test]
    fn test_rail_design_from_shunt() {
        let design = RailDesign::from_shunt(0.002).unwrap();
        assert!(close(design.max_current, 40.96));
        assert!(close(design.current_lsb, 40.96 / 32767.0));
        // 0.00512 / (0.00125004 * 0.002) truncates to 2047
        assert_eq!(design.calibration_word, 2047);
        assert!(design.scale().is_usable());
    }

    #[test]
    fn test_rail_design_rejects_bad_shunt() {
        assert!(RailDesign::from_shunt(0.0).is_err());
        assert!(RailDesign::from_shunt(-0.01).is_err());
        assert!(RailDesign::from_shunt(f64::NAN).is_err());
    }
}
