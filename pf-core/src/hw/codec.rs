//! INA226 register codec
//!
//! Every register is 16 bits, most significant byte first on the wire.
//! A write is the register id followed by the two value bytes; a read
//! selects the register with a one-byte write and then reads two bytes.

use std::time::{Duration, Instant};

use pf_error::BusError;
use tracing::trace;

use super::transceiver::BusTransceiver;

/// INA226 register map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    Configuration = 0x00,
    ShuntVoltage = 0x01,
    BusVoltage = 0x02,
    Power = 0x03,
    Current = 0x04,
    Calibration = 0x05,
    MaskEnable = 0x06,
    AlertLimit = 0x07,
    ManufacturerId = 0xFE,
    DieId = 0xFF,
}

impl Register {
    /// Wire id of the register
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Lower-case name, used in logs and error messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ShuntVoltage => "shunt_voltage",
            Self::BusVoltage => "bus_voltage",
            Self::Power => "power",
            Self::Current => "current",
            Self::Calibration => "calibration",
            Self::MaskEnable => "mask_enable",
            Self::AlertLimit => "alert_limit",
            Self::ManufacturerId => "manufacturer_id",
            Self::DieId => "die_id",
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(Self::Configuration),
            0x01 => Some(Self::ShuntVoltage),
            0x02 => Some(Self::BusVoltage),
            0x03 => Some(Self::Power),
            0x04 => Some(Self::Current),
            0x05 => Some(Self::Calibration),
            0x06 => Some(Self::MaskEnable),
            0x07 => Some(Self::AlertLimit),
            0xFE => Some(Self::ManufacturerId),
            0xFF => Some(Self::DieId),
            _ => None,
        }
    }

    /// Whether the host may write this register
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Configuration | Self::Calibration | Self::MaskEnable | Self::AlertLimit
        )
    }
}

/// Bytes of a register write: id, MSB, LSB
pub fn encode_write(register: Register, value: u16) -> [u8; 3] {
    let [msb, lsb] = value.to_be_bytes();
    [register.id(), msb, lsb]
}

/// Value of a two-byte register read
pub fn decode_value(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Write one register without a transaction bound
pub fn write_register<T: BusTransceiver + ?Sized>(
    bus: &mut T,
    address: u8,
    register: Register,
    value: u16,
) -> Result<(), BusError> {
    RegisterCodec::unbounded().write_register(bus, address, register, value)
}

/// Read one register without a transaction bound
pub fn read_register<T: BusTransceiver + ?Sized>(
    bus: &mut T,
    address: u8,
    register: Register,
) -> Result<u16, BusError> {
    RegisterCodec::unbounded().read_register(bus, address, register)
}

/// Register access with an optional upper bound per transaction
///
/// The bound is also handed to the transceiver, but a response that
/// arrives after the deadline is reported as [`BusError::Timeout`] here
/// even if the transport delivered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCodec {
    timeout: Option<Duration>,
}

impl RegisterCodec {
    pub const fn unbounded() -> Self {
        Self { timeout: None }
    }

    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn write_register<T: BusTransceiver + ?Sized>(
        &self,
        bus: &mut T,
        address: u8,
        register: Register,
        value: u16,
    ) -> Result<(), BusError> {
        let bytes = encode_write(register, value);
        trace!(address = address, register = register.name(), value = value, "register write");
        self.bounded(address, || bus.write(address, &bytes))
    }

    pub fn read_register<T: BusTransceiver + ?Sized>(
        &self,
        bus: &mut T,
        address: u8,
        register: Register,
    ) -> Result<u16, BusError> {
        let mut buf = [0u8; 2];
        self.bounded(address, || {
            bus.write(address, &[register.id()])?;
            bus.read(address, &mut buf)
        })?;
        let value = decode_value(buf);
        trace!(address = address, register = register.name(), value = value, "register read");
        Ok(value)
    }

    fn bounded<F>(&self, address: u8, transaction: F) -> Result<(), BusError>
    where
        F: FnOnce() -> Result<(), BusError>,
    {
        let started = Instant::now();
        transaction()?;
        match self.timeout {
            Some(limit) if started.elapsed() > limit => Err(BusError::Timeout { address }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::transceiver::MockBusTransceiver;
    use mockall::Sequence;

    #[test]
    fn test_encode_write_is_msb_first() {
        assert_eq!(encode_write(Register::Calibration, 0x0D55), [0x05, 0x0D, 0x55]);
        assert_eq!(encode_write(Register::Configuration, 0x0007), [0x00, 0x00, 0x07]);
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(decode_value([0x12, 0x34]), 0x1234);
        assert_eq!(decode_value([0xFF, 0xFE]) as i16, -2);
    }

    #[test]
    fn test_register_ids() {
        assert_eq!(Register::Configuration.id(), 0x00);
        assert_eq!(Register::Calibration.id(), 0x05);
        assert_eq!(Register::ManufacturerId.id(), 0xFE);
        assert_eq!(Register::from_id(0x04), Some(Register::Current));
        assert_eq!(Register::from_id(0x08), None);
        assert!(Register::Calibration.is_writable());
        assert!(!Register::BusVoltage.is_writable());
    }

    #[test]
    fn test_write_register_bytes_on_wire() {
        let mut bus = MockBusTransceiver::new();
        bus.expect_write()
            .withf(|address, bytes| *address == 0x40 && bytes.to_vec() == vec![0x05, 0x0D, 0x55])
            .times(1)
            .returning(|_, _| Ok(()));

        write_register(&mut bus, 0x40, Register::Calibration, 0x0D55).unwrap();
    }

    #[test]
    fn test_read_register_selects_then_reads() {
        let mut seq = Sequence::new();
        let mut bus = MockBusTransceiver::new();
        bus.expect_write()
            .withf(|address, bytes| *address == 0x41 && bytes.to_vec() == vec![0x02])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        bus.expect_read()
            .withf(|address, _| *address == 0x41)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, buf| {
                buf.copy_from_slice(&[0x25, 0x80]);
                Ok(())
            });

        let value = read_register(&mut bus, 0x41, Register::BusVoltage).unwrap();
        assert_eq!(value, 0x2580);
    }

    #[test]
    fn test_read_register_propagates_nack() {
        let mut bus = MockBusTransceiver::new();
        bus.expect_write()
            .returning(|address, _| Err(BusError::Nack { address }));
        bus.expect_read().times(0);

        let err = read_register(&mut bus, 0x45, Register::Current).unwrap_err();
        assert_eq!(err, BusError::Nack { address: 0x45 });
    }

    #[test]
    fn test_late_response_is_timeout() {
        let mut bus = MockBusTransceiver::new();
        bus.expect_write().returning(|_, _| Ok(()));
        bus.expect_read().returning(|_, buf| {
            std::thread::sleep(Duration::from_millis(20));
            buf.copy_from_slice(&[0x00, 0x01]);
            Ok(())
        });

        let codec = RegisterCodec::with_timeout(Duration::from_millis(1));
        let err = codec
            .read_register(&mut bus, 0x42, Register::ShuntVoltage)
            .unwrap_err();
        assert_eq!(err, BusError::Timeout { address: 0x42 });
    }

    #[test]
    fn test_unbounded_codec_accepts_slow_response() {
        let mut bus = MockBusTransceiver::new();
        bus.expect_write().returning(|_, _| Ok(()));
        bus.expect_read().returning(|_, buf| {
            std::thread::sleep(Duration::from_millis(5));
            buf.copy_from_slice(&[0x00, 0x07]);
            Ok(())
        });

        let value = read_register(&mut bus, 0x40, Register::Configuration).unwrap();
        assert_eq!(value, 0x0007);
    }
}
