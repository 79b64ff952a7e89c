//! Constants and configuration values for power-fetcher
//!
//! Centralizes chip scale factors, bus defaults and paths.
//! Add new magic numbers here first and reference them from the modules.

/// INA226 chip constants
pub mod ina226 {
    /// Number of addressable slots per bus
    pub const SLOTS_PER_BUS: usize = 16;

    /// Bus voltage register LSB in volts (1.25 mV)
    pub const BUS_VOLTAGE_LSB_V: f64 = 0.001_25;

    /// Shunt voltage register LSB in volts (2.5 µV)
    pub const SHUNT_VOLTAGE_LSB_V: f64 = 0.000_002_5;

    /// Internal fixed value of the calibration equation
    /// `calibration = 0.00512 / (current_lsb * r_shunt)`
    pub const CALIBRATION_SCALE: f64 = 0.005_12;

    /// Ratio between the power LSB and the current LSB used when a slot
    /// does not state its power LSB explicitly
    pub const POWER_LSB_PER_CURRENT_LSB: f64 = 20.0;

    /// Full-scale shunt voltage (81.92 mV)
    pub const SHUNT_FULL_SCALE_V: f64 = 0.081_92;

    /// Largest positive value of the signed current register
    pub const CURRENT_REGISTER_MAX: f64 = 32_767.0;

    /// Highest calibration word the chip accepts (bit 15 is ignored)
    pub const CALIBRATION_MAX: u16 = 0x7FFF;

    /// Default configuration word: 140 µs conversions, no averaging, continuous
    pub const DEFAULT_CONFIGURATION_WORD: u16 = 0x0007;

    /// Configuration register value after power-on reset
    pub const RESET_CONFIGURATION_WORD: u16 = 0x4127;

    /// Manufacturer id of Texas Instruments parts ("TI")
    pub const TI_MANUFACTURER_ID: u16 = 0x5449;

    /// Die id of the INA226
    pub const INA226_DIE_ID: u16 = 0x2260;

    /// Divisor the chip applies when computing the power register
    /// (`power = current * bus_voltage / 20000`)
    pub const POWER_REGISTER_DIVISOR: u32 = 20_000;

    /// Divisor the chip applies when computing the current register
    /// (`current = shunt_voltage * calibration / 2048`)
    pub const CURRENT_REGISTER_DIVISOR: i64 = 2_048;
}

/// I2C bus defaults
pub mod bus {
    /// Nominal bus clock frequency (1 MHz fast mode plus)
    pub const DEFAULT_CLOCK_FREQUENCY_HZ: u32 = 1_000_000;

    /// Default upper bound for one bus transaction
    pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 10;

    /// Lowest valid 7-bit device address (0x00..0x02 are reserved)
    pub const MIN_DEVICE_ADDRESS: u8 = 0x03;

    /// Highest valid 7-bit device address (0x78..0x7F are reserved)
    pub const MAX_DEVICE_ADDRESS: u8 = 0x77;

    /// Base address of INA226 parts before pin strapping
    pub const INA226_BASE_ADDRESS: u8 = 0x40;
}

/// Polling cadence defaults
pub mod timing {
    /// Default interval between read passes
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

    /// Default interval between presence scans
    pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 5_000;

    /// Default interval between throughput statistics log lines
    pub const DEFAULT_STATS_INTERVAL_S: u64 = 10;
}

/// System paths
pub mod paths {
    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/power-fetcher";

    /// Bus configuration file name
    pub const BUS_CONFIG_FILE: &str = "buses.json";

    /// Prefix of Linux i2c-dev character devices (`/dev/i2c-<n>`)
    pub const I2C_DEV_PREFIX: &str = "/dev/i2c-";

    /// Maximum accepted configuration file size in bytes
    pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

    /// Full path of the default configuration file
    pub fn default_config_path() -> std::path::PathBuf {
        std::path::Path::new(CONFIG_DIR).join(BUS_CONFIG_FILE)
    }

    /// Character device for a bus index
    pub fn i2c_device_path(bus_index: u8) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("{}{}", I2C_DEV_PREFIX, bus_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_scale_matches_shunt_lsb() {
        // 0.00512 / 2048 is exactly the shunt voltage LSB
        let ratio = ina226::CALIBRATION_SCALE / ina226::CURRENT_REGISTER_DIVISOR as f64;
        assert!((ratio - ina226::SHUNT_VOLTAGE_LSB_V).abs() < 1e-15);
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            paths::default_config_path(),
            std::path::PathBuf::from("/etc/power-fetcher/buses.json")
        );
        assert_eq!(paths::i2c_device_path(2), std::path::PathBuf::from("/dev/i2c-2"));
    }
}
