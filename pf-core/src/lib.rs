//! power-fetcher core library
//!
//! Continuous acquisition of INA226 power monitors spread over several I2C
//! buses.
//!
//! # Features
//!
//! - **Register Codec**: Big-endian 16-bit register access over any byte transceiver
//! - **Presence Tracking**: Periodic scans decide which slots are online
//! - **Configure Before Read**: Configuration and calibration are rewritten after every scan
//! - **Calibrated Readings**: Bus voltage, shunt voltage, current and power in SI units
//! - **Simulation**: A register-level INA226 model for tests and hardware-free runs
//!
//! # Module Structure
//!
//! - `hw/` - Transceiver seam, register codec, bus manager, simulated bus
//! - `data/` - Data types, configuration, validation
//! - `engine/` - Calibration engine and acquisition loop
//!
//! # Example
//!
//! ```no_run
//! use pf_core::{AcquisitionConfig, BusManager, SimulatedBus};
//!
//! let config = AcquisitionConfig::builtin();
//! let tables = config.device_tables().unwrap();
//! let (bus, table) = &tables[0];
//! let sim = SimulatedBus::populated_from(table);
//! let mut manager = BusManager::new(bus.index, sim, table.clone());
//! manager.refresh();
//! let measurement = manager.read_slot(0).unwrap();
//! println!("{} A", measurement.current);
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;

pub use pf_error::{BusError, PowerFetcherError, ReadError, Result};

pub use data::{
    device_address, load_config, load_config_or_builtin, AcquisitionConfig, AddressPin, BusConfig,
    ConfigurationWord, CurrentScale, DeviceDescriptor, DeviceTable, Measurement,
    MeasurementRecord, OperatingMode, Slot, SlotEntry,
};
pub use engine::{
    Acquisition, AcquisitionStats, CycleOutcome, MeasurementSink, RailDesign, StatsSummary,
    StopSignal,
};
pub use hw::{
    BusManager, BusTransceiver, DeviceIdentity, Fault, Register, ScanReport, SimulatedBus,
    SimulatedDevice, SimulatedProvider, TransceiverProvider,
};
