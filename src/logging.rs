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

//! Logging setup
//!
//! Diagnostics go to the systemd journal when it is available and to stderr
//! otherwise. Stdout is reserved for measurement records.

use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "POWER_FETCHER_LOG";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log lines ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Journald,
    Stderr,
}

impl LogTarget {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Journald => "systemd journal",
            Self::Stderr => "stderr",
        }
    }
}

/// Filter directive from the environment, `info` when unset or empty
pub fn log_filter() -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the global subscriber
pub fn init_logging() -> LogTarget {
    let filter = log_filter();

    if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(EnvFilter::new(&filter))
                    .init();
                return LogTarget::Journald;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(EnvFilter::new(&filter))
        .init();
    LogTarget::Stderr
}
