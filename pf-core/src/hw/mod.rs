//! Hardware interaction modules
//!
//! Contains the bus transceiver seam, the INA226 register codec, the bus
//! manager and the simulated bus.

pub mod bus;
pub mod codec;
pub mod sim;
pub mod transceiver;

pub use bus::{BusManager, DeviceIdentity, ScanReport};
pub use codec::{read_register, write_register, Register, RegisterCodec};
pub use sim::{Fault, SimulatedBus, SimulatedDevice, SimulatedProvider, WireWrite};
pub use transceiver::{BusTransceiver, TransceiverProvider};
