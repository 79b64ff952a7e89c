//! Bus transceiver abstraction
//!
//! The transceiver moves raw bytes to and from a device address. It owns
//! the bus handle: opening it (at the configured clock frequency) happens
//! in [`TransceiverProvider::open`] and closing it when the transceiver is
//! dropped. Clock timing and electrical-layer retries are its business,
//! never the core's.

use std::time::Duration;

use pf_error::BusError;

/// Byte-level access to one physical bus
#[cfg_attr(test, mockall::automock)]
pub trait BusTransceiver: Send {
    /// Write `bytes` to the device at the 7-bit `address`
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Fill `buf` with bytes read from the device at `address`
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Bound every following transaction by `timeout`
    ///
    /// Transports that cannot enforce a bound themselves may ignore this;
    /// the register codec still rejects late responses.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError>;
}

impl<T: BusTransceiver + ?Sized> BusTransceiver for Box<T> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(address, buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        (**self).set_timeout(timeout)
    }
}

/// Opens transceivers for bus indices
pub trait TransceiverProvider {
    type Transceiver: BusTransceiver + 'static;

    /// Open the bus identified by `bus_index` at `clock_frequency_hz`
    fn open(&self, bus_index: u8, clock_frequency_hz: u32) -> Result<Self::Transceiver, BusError>;
}
