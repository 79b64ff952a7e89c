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

//! power-fetcher - INA226 power telemetry daemon for Linux
//!
//! This library wires the `pf-core` acquisition engine to Linux i2c-dev
//! buses, runs one acquisition worker per bus and reports every measurement
//! as a JSON line.

pub mod daemon;
pub mod i2cdev;
pub mod logging;
pub mod report;
