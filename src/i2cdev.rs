/*
 * This file is part of power-fetcher.
 *
 * Copyright (C) 2025 power-fetcher contributors
 *
 * power-fetcher is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * power-fetcher is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with power-fetcher. If not, see <https://www.gnu.org/licenses/>.
 */

//! Linux i2c-dev transceiver
//!
//! Talks to `/dev/i2c-<n>` with plain read/write after selecting the target
//! address with the `I2C_SLAVE` ioctl. The bus clock is fixed by the kernel
//! adapter driver; the configured frequency is only checked against it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pf_core::constants::paths;
use pf_core::{BusConfig, BusTransceiver, TransceiverProvider};
use pf_error::BusError;
use tracing::{debug, warn};

// linux/i2c-dev.h
const I2C_RETRIES: libc::c_ulong = 0x0701;
const I2C_TIMEOUT: libc::c_ulong = 0x0702;
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Transceiver over one i2c-dev character device
pub struct I2cDevTransceiver {
    file: File,
    bus_index: u8,
    path: PathBuf,
    selected: Option<u8>,
}

impl I2cDevTransceiver {
    pub fn open(path: &Path, bus_index: u8) -> Result<Self, BusError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| BusError::Unavailable {
                bus: bus_index,
                reason: format!("{}: {}", path.display(), e),
            })?;

        let mut transceiver = Self {
            file,
            bus_index,
            path: path.to_path_buf(),
            selected: None,
        };
        // Retries belong to the adapter; one attempt per transaction here
        if let Err(e) = transceiver.ioctl(I2C_RETRIES, 0) {
            debug!(bus = bus_index, error = %e, "I2C_RETRIES not supported");
        }
        debug!(bus = bus_index, path = %transceiver.path.display(), "bus opened");
        Ok(transceiver)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ioctl(&mut self, request: libc::c_ulong, arg: libc::c_ulong) -> io::Result<()> {
        // SAFETY: the fd is owned by `self.file` and stays open for the call; the
        // i2c-dev requests used here take an integer argument, not a pointer.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn select(&mut self, address: u8) -> Result<(), BusError> {
        if self.selected == Some(address) {
            return Ok(());
        }
        self.ioctl(I2C_SLAVE, address as libc::c_ulong)
            .map_err(|e| map_io_error(address, e))?;
        self.selected = Some(address);
        Ok(())
    }
}

impl BusTransceiver for I2cDevTransceiver {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        self.select(address)?;
        let written = self
            .file
            .write(bytes)
            .map_err(|e| map_io_error(address, e))?;
        if written != bytes.len() {
            return Err(BusError::ShortTransfer {
                address,
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.select(address)?;
        let read = self.file.read(buf).map_err(|e| map_io_error(address, e))?;
        if read != buf.len() {
            return Err(BusError::ShortTransfer {
                address,
                expected: buf.len(),
                actual: read,
            });
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        let units = timeout_units(timeout);
        self.ioctl(I2C_TIMEOUT, units)
            .map_err(|e| BusError::Io(format!("I2C_TIMEOUT on bus {}: {}", self.bus_index, e)))
    }
}

/// `I2C_TIMEOUT` counts in 10 ms units; round up, never zero
pub fn timeout_units(timeout: Duration) -> libc::c_ulong {
    let units = (timeout.as_millis() + 9) / 10;
    units.clamp(1, libc::c_ulong::MAX as u128) as libc::c_ulong
}

/// Classify an i2c-dev error
pub fn map_io_error(address: u8, err: io::Error) -> BusError {
    match err.raw_os_error() {
        Some(libc::ENXIO) | Some(libc::EREMOTEIO) => BusError::Nack { address },
        Some(libc::ETIMEDOUT) => BusError::Timeout { address },
        _ => BusError::Io(err.to_string()),
    }
}

/// Opens i2c-dev nodes, honouring per-bus device overrides
#[derive(Debug, Clone, Default)]
pub struct I2cDevProvider {
    devices: HashMap<u8, PathBuf>,
}

impl I2cDevProvider {
    pub fn from_buses(buses: &[BusConfig]) -> Self {
        Self {
            devices: buses.iter().map(|b| (b.index, b.device_path())).collect(),
        }
    }

    pub fn device_path(&self, bus_index: u8) -> PathBuf {
        self.devices
            .get(&bus_index)
            .cloned()
            .unwrap_or_else(|| paths::i2c_device_path(bus_index))
    }
}

impl TransceiverProvider for I2cDevProvider {
    type Transceiver = I2cDevTransceiver;

    fn open(&self, bus_index: u8, clock_frequency_hz: u32) -> Result<I2cDevTransceiver, BusError> {
        let path = self.device_path(bus_index);
        let transceiver = I2cDevTransceiver::open(&path, bus_index)?;

        match adapter_clock_hz(bus_index) {
            Some(actual) if actual != clock_frequency_hz => warn!(
                bus = bus_index,
                configured = clock_frequency_hz,
                actual = actual,
                "adapter clock differs from configuration"
            ),
            Some(_) => {}
            None => debug!(
                bus = bus_index,
                configured = clock_frequency_hz,
                "adapter clock not exposed, assuming configured frequency"
            ),
        }
        Ok(transceiver)
    }
}

/// Bus clock reported by the device tree, when available
fn adapter_clock_hz(bus_index: u8) -> Option<u32> {
    let path = format!("/sys/class/i2c-adapter/i2c-{}/of_node/clock-frequency", bus_index);
    let bytes = std::fs::read(path).ok()?;
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}
