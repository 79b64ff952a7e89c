//! Bus manager
//!
//! Owns one transceiver and the slot table of that bus. The table is the
//! single source of truth for which devices exist and whether they are
//! online; it is only mutated from the thread driving this manager.
//!
//! A slot can be read only after the scan that brought it online was
//! followed by a successful configuration pass. Any transport error while
//! configuring or reading drops the slot back offline.

use std::time::Duration;

use pf_error::{BusError, PowerFetcherError, ReadError};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::codec::{Register, RegisterCodec};
use super::transceiver::BusTransceiver;
use crate::constants::ina226::SLOTS_PER_BUS;
use crate::data::types::{timestamp_us, DeviceTable, Measurement};
use crate::engine::calibration::{self, RawRegisters};

/// Outcome of a scan and configuration pass, by component tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub bus_index: u8,
    /// Populated slots that answered
    pub online: Vec<char>,
    /// Populated slots that did not answer
    pub missing: Vec<char>,
    pub newly_online: Vec<char>,
    pub newly_offline: Vec<char>,
    /// Slots demoted because a configuration write failed
    pub configuration_failures: Vec<char>,
}

impl ScanReport {
    /// Slots online and configured after the pass
    pub fn configured_count(&self) -> usize {
        self.online.len() - self.configuration_failures.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.newly_online.is_empty()
            || !self.newly_offline.is_empty()
            || !self.configuration_failures.is_empty()
    }
}

/// Identity registers of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub manufacturer_id: u16,
    pub die_id: u16,
}

pub struct BusManager<T> {
    bus_index: u8,
    transceiver: T,
    table: DeviceTable,
    codec: RegisterCodec,
    /// Bit n set: slot n configured since it last came online
    configured: u16,
    expected_manufacturer_id: Option<u16>,
}

impl<T: BusTransceiver> BusManager<T> {
    pub fn new(bus_index: u8, transceiver: T, table: DeviceTable) -> Self {
        Self {
            bus_index,
            transceiver,
            table,
            codec: RegisterCodec::unbounded(),
            configured: 0,
            expected_manufacturer_id: None,
        }
    }

    /// Bound every transaction on this bus
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        if let Err(e) = self.transceiver.set_timeout(timeout) {
            warn!(bus = self.bus_index, error = %e, "transceiver rejected timeout, relying on codec deadline");
        }
        self.codec = RegisterCodec::with_timeout(timeout);
        self
    }

    /// Require this manufacturer id for a device to count as present
    pub fn with_expected_manufacturer_id(mut self, id: Option<u16>) -> Self {
        self.expected_manufacturer_id = id;
        self
    }

    pub fn bus_index(&self) -> u8 {
        self.bus_index
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    pub fn is_configured(&self, slot_index: usize) -> bool {
        slot_index < SLOTS_PER_BUS && self.configured & (1 << slot_index) != 0
    }

    /// Slots that may be read right now
    pub fn readable_slots(&self) -> Vec<usize> {
        self.table
            .online_indices()
            .into_iter()
            .filter(|&i| self.is_configured(i))
            .collect()
    }

    /// Probe every populated slot and update its online flag
    pub fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport {
            bus_index: self.bus_index,
            ..ScanReport::default()
        };

        for index in 0..self.table.slots().len() {
            let (address, tag, was_online) = match self.table.get(index) {
                Some(slot) => match &slot.descriptor {
                    Some(d) => (d.address, d.component_tag, slot.online),
                    None => continue,
                },
                None => continue,
            };

            let present = self.probe(address);
            if let Some(slot) = self.table.get_mut(index) {
                slot.online = present;
            }

            match (was_online, present) {
                (false, true) => {
                    info!(bus = self.bus_index, slot = index, address = address, tag = %tag, "device came online");
                    self.clear_configured(index);
                    report.newly_online.push(tag);
                }
                (true, false) => {
                    warn!(bus = self.bus_index, slot = index, address = address, tag = %tag, "device went offline");
                    self.clear_configured(index);
                    report.newly_offline.push(tag);
                }
                _ => {}
            }

            if present {
                report.online.push(tag);
            } else {
                report.missing.push(tag);
            }
        }

        debug!(
            bus = self.bus_index,
            online = report.online.len(),
            missing = report.missing.len(),
            "scan complete"
        );
        report
    }

    /// Write configuration then calibration to every online slot
    ///
    /// Returns one error per slot that failed; those slots are offline
    /// afterwards.
    pub fn configure_online_devices(&mut self) -> Vec<PowerFetcherError> {
        let mut failures = Vec::new();

        for index in self.table.online_indices() {
            let descriptor = match self.table.get(index).and_then(|s| s.descriptor.clone()) {
                Some(d) => d,
                None => continue,
            };

            let writes = [
                (Register::Configuration, descriptor.configuration_word),
                (Register::Calibration, descriptor.calibration_word),
            ];
            let mut failed = None;
            for (register, value) in writes {
                if let Err(source) =
                    self.codec
                        .write_register(&mut self.transceiver, descriptor.address, register, value)
                {
                    failed = Some(PowerFetcherError::ConfigurationWriteFailed {
                        bus: self.bus_index,
                        slot: index,
                        register: register.name(),
                        source,
                    });
                    break;
                }
            }

            match failed {
                Some(err) => {
                    warn!(bus = self.bus_index, slot = index, tag = %descriptor.component_tag, error = %err, "configuration failed, slot offline");
                    self.mark_offline(index);
                    failures.push(err);
                }
                None => {
                    debug!(
                        bus = self.bus_index,
                        slot = index,
                        config = descriptor.configuration_word,
                        calibration = descriptor.calibration_word,
                        "slot configured"
                    );
                    self.configured |= 1 << index;
                }
            }
        }

        failures
    }

    /// Scan, then configure every online slot
    pub fn refresh(&mut self) -> ScanReport {
        let mut report = self.scan();
        let failures = self.configure_online_devices();

        for failure in failures {
            if let PowerFetcherError::ConfigurationWriteFailed { slot, .. } = failure {
                if let Some(tag) = self.tag(slot) {
                    report.configuration_failures.push(tag);
                }
            }
        }
        report
    }

    /// Read and convert one slot
    pub fn read_slot(&mut self, slot_index: usize) -> Result<Measurement, ReadError> {
        let invalid = ReadError::InvalidSlot {
            bus: self.bus_index,
            slot: slot_index,
        };
        let descriptor = match self.table.get(slot_index) {
            Some(slot) if slot.online && self.is_configured(slot_index) => {
                slot.descriptor.clone().ok_or(invalid)?
            }
            _ => return Err(invalid),
        };

        let scale = calibration::scale_for(self.bus_index, slot_index, &descriptor)?;

        let raw = match self.read_raw(descriptor.address) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(bus = self.bus_index, slot = slot_index, tag = %descriptor.component_tag, error = %e, "read failed, slot offline");
                self.mark_offline(slot_index);
                return Err(ReadError::Transport(e));
            }
        };

        let reading = calibration::convert(&raw, &scale);
        Ok(Measurement {
            bus_index: self.bus_index,
            slot_index,
            component_tag: descriptor.component_tag,
            bus_voltage: reading.bus_voltage,
            shunt_voltage: reading.shunt_voltage,
            current: reading.current,
            power: reading.power,
            timestamp_us: timestamp_us(),
        })
    }

    /// Manufacturer and die id of an online slot
    pub fn read_identity(&mut self, slot_index: usize) -> Result<DeviceIdentity, ReadError> {
        let address = match self.table.get(slot_index) {
            Some(slot) if slot.online => slot.descriptor.as_ref().map(|d| d.address),
            _ => None,
        }
        .ok_or(ReadError::InvalidSlot {
            bus: self.bus_index,
            slot: slot_index,
        })?;

        let mut read = |register: Register| self.codec.read_register(&mut self.transceiver, address, register);
        let identity = read(Register::ManufacturerId).and_then(|manufacturer_id| {
            Ok(DeviceIdentity {
                manufacturer_id,
                die_id: read(Register::DieId)?,
            })
        });

        identity.map_err(|e| {
            warn!(bus = self.bus_index, slot = slot_index, error = %e, "identity read failed, slot offline");
            self.mark_offline(slot_index);
            ReadError::Transport(e)
        })
    }

    fn read_raw(&mut self, address: u8) -> Result<RawRegisters, BusError> {
        let mut read = |register: Register| self.codec.read_register(&mut self.transceiver, address, register);
        Ok(RawRegisters {
            bus_voltage: read(Register::BusVoltage)?,
            shunt_voltage: read(Register::ShuntVoltage)?,
            current: read(Register::Current)?,
            power: read(Register::Power)?,
        })
    }

    fn probe(&mut self, address: u8) -> bool {
        match self
            .codec
            .read_register(&mut self.transceiver, address, Register::ManufacturerId)
        {
            Ok(0) => false,
            Ok(id) => match self.expected_manufacturer_id {
                Some(expected) if expected != id => {
                    debug!(bus = self.bus_index, address = address, id = id, "unexpected manufacturer id");
                    false
                }
                _ => true,
            },
            Err(e) => {
                debug!(bus = self.bus_index, address = address, error = %e, "probe failed");
                false
            }
        }
    }

    fn mark_offline(&mut self, index: usize) {
        if let Some(slot) = self.table.get_mut(index) {
            slot.online = false;
        }
        self.clear_configured(index);
    }

    fn clear_configured(&mut self, index: usize) {
        if index < SLOTS_PER_BUS {
            self.configured &= !(1 << index);
        }
    }

    fn tag(&self, index: usize) -> Option<char> {
        self.table
            .get(index)
            .and_then(|s| s.descriptor.as_ref())
            .map(|d| d.component_tag)
    }
}
