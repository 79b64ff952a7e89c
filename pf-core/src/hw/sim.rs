//! Simulated INA226 bus
//!
//! Register-level model of INA226 devices behind a [`BusTransceiver`], with
//! fault injection and a write log. Clones share state, so a test can keep
//! a handle while the bus manager owns another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pf_error::BusError;

use super::codec::Register;
use super::transceiver::{BusTransceiver, TransceiverProvider};
use crate::constants::ina226::{
    CURRENT_REGISTER_DIVISOR, INA226_DIE_ID, POWER_REGISTER_DIVISOR, RESET_CONFIGURATION_WORD,
    TI_MANUFACTURER_ID,
};
use crate::data::types::DeviceTable;

/// Reset bit of the configuration register
const CONFIG_RESET_BIT: u16 = 0x8000;

/// Register file of one simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    registers: HashMap<u8, u16>,
    pointer: u8,
}

impl SimulatedDevice {
    /// Device in its power-on state
    pub fn ina226() -> Self {
        let mut device = Self {
            registers: HashMap::new(),
            pointer: 0,
        };
        device.reset();
        device
    }

    /// Device with the given shunt and bus register values
    pub fn with_rail(shunt_raw: i16, bus_raw: u16) -> Self {
        let mut device = Self::ina226();
        device.set_rail(shunt_raw, bus_raw);
        device
    }

    pub fn with_register(mut self, register: Register, value: u16) -> Self {
        self.registers.insert(register.id(), value);
        self
    }

    pub fn register(&self, register: Register) -> u16 {
        self.registers.get(&register.id()).copied().unwrap_or(0)
    }

    /// Set the measured inputs and recompute the derived registers
    pub fn set_rail(&mut self, shunt_raw: i16, bus_raw: u16) {
        self.registers.insert(Register::ShuntVoltage.id(), shunt_raw as u16);
        self.registers.insert(Register::BusVoltage.id(), bus_raw);
        self.recompute();
    }

    fn reset(&mut self) {
        self.registers.clear();
        self.registers
            .insert(Register::Configuration.id(), RESET_CONFIGURATION_WORD);
        self.registers
            .insert(Register::ManufacturerId.id(), TI_MANUFACTURER_ID);
        self.registers.insert(Register::DieId.id(), INA226_DIE_ID);
        self.pointer = 0;
    }

    // current = shunt * cal / 2048, power = current * bus / 20000
    fn recompute(&mut self) {
        let cal = self.register(Register::Calibration) as i64;
        let shunt = self.register(Register::ShuntVoltage) as i16 as i64;
        let bus = self.register(Register::BusVoltage) as i64;

        let current = shunt * cal / CURRENT_REGISTER_DIVISOR;
        let current = current.clamp(i16::MIN as i64, i16::MAX as i64);
        let power = (current.abs() * bus / POWER_REGISTER_DIVISOR as i64).min(u16::MAX as i64);

        self.registers
            .insert(Register::Current.id(), current as i16 as u16);
        self.registers.insert(Register::Power.id(), power as u16);
    }

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<Option<(u8, u16)>, BusError> {
        match bytes {
            [pointer] => {
                self.pointer = *pointer;
                Ok(None)
            }
            [pointer, msb, lsb] => {
                self.pointer = *pointer;
                let value = u16::from_be_bytes([*msb, *lsb]);
                match Register::from_id(*pointer) {
                    Some(Register::Configuration) if value & CONFIG_RESET_BIT != 0 => self.reset(),
                    Some(register) if register.is_writable() => {
                        self.registers.insert(register.id(), value);
                        if register == Register::Calibration {
                            self.recompute();
                        }
                    }
                    // read-only registers ignore writes
                    _ => {}
                }
                Ok(Some((*pointer, value)))
            }
            _ => Err(BusError::ShortTransfer {
                address,
                expected: 3,
                actual: bytes.len(),
            }),
        }
    }

    fn read(&self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        if buf.len() != 2 {
            return Err(BusError::ShortTransfer {
                address,
                expected: 2,
                actual: buf.len(),
            });
        }
        let value = self.registers.get(&self.pointer).copied().unwrap_or(0);
        buf.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

/// Injected misbehaviour of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every transaction is not acknowledged
    Nack,
    /// Register reads fail with an I/O error
    FailReads,
    /// Value writes to one register are not acknowledged
    FailRegisterWrite(Register),
    /// Every read is delayed
    Delay(Duration),
}

/// A register value write that reached a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireWrite {
    pub address: u8,
    pub register: u8,
    pub value: u16,
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<u8, SimulatedDevice>,
    faults: HashMap<u8, Fault>,
    writes: Vec<WireWrite>,
    timeout: Option<Duration>,
    transactions: u64,
}

/// Simulated bus; clones share devices, faults and log
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with a device at every populated address of `table`
    ///
    /// Rails get distinct plausible values so simulated output is easy to
    /// tell apart.
    pub fn populated_from(table: &DeviceTable) -> Self {
        let bus = Self::new();
        for (slot, descriptor) in table.populated() {
            let shunt_raw = 400 + 40 * slot as i16;
            let bus_raw = 9_600 - 160 * slot as u16;
            bus.attach(descriptor.address, SimulatedDevice::with_rail(shunt_raw, bus_raw));
        }
        bus
    }

    pub fn attach(&self, address: u8, device: SimulatedDevice) {
        self.state.lock().devices.insert(address, device);
    }

    pub fn detach(&self, address: u8) -> Option<SimulatedDevice> {
        self.state.lock().devices.remove(&address)
    }

    pub fn inject(&self, address: u8, fault: Fault) {
        self.state.lock().faults.insert(address, fault);
    }

    pub fn clear_fault(&self, address: u8) {
        self.state.lock().faults.remove(&address);
    }

    /// Snapshot of one device's registers
    pub fn device(&self, address: u8) -> Option<SimulatedDevice> {
        self.state.lock().devices.get(&address).cloned()
    }

    pub fn set_rail(&self, address: u8, shunt_raw: i16, bus_raw: u16) -> bool {
        match self.state.lock().devices.get_mut(&address) {
            Some(device) => {
                device.set_rail(shunt_raw, bus_raw);
                true
            }
            None => false,
        }
    }

    /// Overwrite a register directly, bypassing write rules
    pub fn set_register(&self, address: u8, register: Register, value: u16) -> bool {
        match self.state.lock().devices.get_mut(&address) {
            Some(device) => {
                device.registers.insert(register.id(), value);
                true
            }
            None => false,
        }
    }

    pub fn write_log(&self) -> Vec<WireWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_write_log(&self) {
        self.state.lock().writes.clear();
    }

    /// Last timeout handed to the transceiver
    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Number of read and write transactions so far
    pub fn transactions(&self) -> u64 {
        self.state.lock().transactions
    }
}

impl BusTransceiver for SimulatedBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.transactions += 1;

        let fault = state.faults.get(&address).copied();
        match fault {
            Some(Fault::Nack) => return Err(BusError::Nack { address }),
            Some(Fault::FailRegisterWrite(register))
                if bytes.len() > 1 && bytes.first() == Some(&register.id()) =>
            {
                return Err(BusError::Nack { address })
            }
            _ => {}
        }

        let device = state
            .devices
            .get_mut(&address)
            .ok_or(BusError::Nack { address })?;
        let logged = device.write(address, bytes)?;
        if let Some((register, value)) = logged {
            state.writes.push(WireWrite {
                address,
                register,
                value,
            });
        }
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let delay = {
            let mut state = self.state.lock();
            state.transactions += 1;

            match state.faults.get(&address).copied() {
                Some(Fault::Nack) => return Err(BusError::Nack { address }),
                Some(Fault::FailReads) => {
                    return Err(BusError::Io(format!("injected read failure at 0x{:02X}", address)))
                }
                Some(Fault::Delay(delay)) => Some(delay),
                _ => None,
            }
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let state = self.state.lock();
        let device = state
            .devices
            .get(&address)
            .ok_or(BusError::Nack { address })?;
        device.read(address, buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        self.state.lock().timeout = Some(timeout);
        Ok(())
    }
}

/// Hands out simulated buses by index
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    buses: HashMap<u8, SimulatedBus>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bus_index: u8, bus: SimulatedBus) {
        self.buses.insert(bus_index, bus);
    }

    pub fn bus(&self, bus_index: u8) -> Option<&SimulatedBus> {
        self.buses.get(&bus_index)
    }
}

impl TransceiverProvider for SimulatedProvider {
    type Transceiver = SimulatedBus;

    fn open(&self, bus_index: u8, _clock_frequency_hz: u32) -> Result<SimulatedBus, BusError> {
        self.buses
            .get(&bus_index)
            .cloned()
            .ok_or_else(|| BusError::Unavailable {
                bus: bus_index,
                reason: "no simulated bus".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::codec::{read_register, write_register};

    #[test]
    fn test_identity_registers() {
        let mut bus = SimulatedBus::new();
        bus.attach(0x40, SimulatedDevice::ina226());
        assert_eq!(read_register(&mut bus, 0x40, Register::ManufacturerId).unwrap(), 0x5449);
        assert_eq!(read_register(&mut bus, 0x40, Register::DieId).unwrap(), 0x2260);
        assert_eq!(read_register(&mut bus, 0x40, Register::Configuration).unwrap(), 0x4127);
    }

    #[test]
    fn test_absent_device_nacks() {
        let mut bus = SimulatedBus::new();
        let err = read_register(&mut bus, 0x44, Register::ManufacturerId).unwrap_err();
        assert_eq!(err, BusError::Nack { address: 0x44 });
    }

    #[test]
    fn test_calibration_write_drives_current() {
        let mut bus = SimulatedBus::new();
        // 1 mV across the shunt, 12 V bus
        bus.attach(0x42, SimulatedDevice::with_rail(400, 9600));
        assert_eq!(read_register(&mut bus, 0x42, Register::Current).unwrap(), 0);

        write_register(&mut bus, 0x42, Register::Calibration, 2560).unwrap();
        assert_eq!(read_register(&mut bus, 0x42, Register::Current).unwrap(), 500);
        // 500 * 9600 / 20000
        assert_eq!(read_register(&mut bus, 0x42, Register::Power).unwrap(), 240);

        let log = bus.write_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], WireWrite { address: 0x42, register: 0x05, value: 2560 });
    }

    #[test]
    fn test_read_only_registers_ignore_writes() {
        let mut bus = SimulatedBus::new();
        bus.attach(0x40, SimulatedDevice::with_rail(100, 1000));
        write_register(&mut bus, 0x40, Register::BusVoltage, 0x1234).unwrap();
        assert_eq!(read_register(&mut bus, 0x40, Register::BusVoltage).unwrap(), 1000);
    }

    #[test]
    fn test_reset_bit_restores_defaults() {
        let mut bus = SimulatedBus::new();
        bus.attach(0x40, SimulatedDevice::ina226());
        write_register(&mut bus, 0x40, Register::Calibration, 0x0D55).unwrap();
        write_register(&mut bus, 0x40, Register::Configuration, 0x8000).unwrap();
        assert_eq!(read_register(&mut bus, 0x40, Register::Calibration).unwrap(), 0);
        assert_eq!(read_register(&mut bus, 0x40, Register::Configuration).unwrap(), 0x4127);
    }

    #[test]
    fn test_fault_injection() {
        let mut bus = SimulatedBus::new();
        bus.attach(0x41, SimulatedDevice::ina226());

        bus.inject(0x41, Fault::FailReads);
        assert!(matches!(
            read_register(&mut bus, 0x41, Register::DieId),
            Err(BusError::Io(_))
        ));

        bus.inject(0x41, Fault::FailRegisterWrite(Register::Calibration));
        assert!(write_register(&mut bus, 0x41, Register::Configuration, 7).is_ok());
        assert!(write_register(&mut bus, 0x41, Register::Calibration, 1).is_err());

        bus.clear_fault(0x41);
        assert!(write_register(&mut bus, 0x41, Register::Calibration, 1).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let handle = SimulatedBus::new();
        let mut owned = handle.clone();
        handle.attach(0x43, SimulatedDevice::ina226());
        assert!(read_register(&mut owned, 0x43, Register::DieId).is_ok());
        handle.detach(0x43);
        assert!(read_register(&mut owned, 0x43, Register::DieId).is_err());
    }

    #[test]
    fn test_provider_open() {
        let mut provider = SimulatedProvider::new();
        provider.insert(1, SimulatedBus::new());
        assert!(provider.open(1, 1_000_000).is_ok());
        assert!(matches!(
            provider.open(2, 1_000_000),
            Err(BusError::Unavailable { bus: 2, .. })
        ));
    }
}
