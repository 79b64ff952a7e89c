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

//! power-fetcher daemon
//!
//! Continuously acquires bus voltage, shunt voltage, current and power from
//! INA226 monitors on several I2C buses and writes one JSON record per
//! reading to stdout (or `--output`).
//!
//! # Lifecycle
//! - Parse arguments, initialise logging
//! - Load `/etc/power-fetcher/buses.json` (or the built-in tables)
//! - Open one transceiver per bus; unavailable buses are skipped
//! - Scan, configure and read until SIGINT/SIGTERM, `--once` or `--benchmark`
//! - Join the workers and print the throughput summary

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use pf_core::constants::paths;
use pf_core::{load_config, load_config_or_builtin, AcquisitionConfig, StopSignal};
use power_fetcher::daemon::{self, RunOptions};
use power_fetcher::i2cdev::I2cDevProvider;
use power_fetcher::logging;
use power_fetcher::report::open_output;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    once: bool,
    benchmark: Option<Duration>,
    simulate: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(Args),
    Help,
    Version,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => {
                let path = args.next().ok_or("--config requires a path argument")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-o" | "--output" => {
                let path = args.next().ok_or("--output requires a path argument")?;
                parsed.output = Some(PathBuf::from(path));
            }
            "--once" => parsed.once = true,
            "--simulate" => parsed.simulate = true,
            "--benchmark" => {
                let secs = args.next().ok_or("--benchmark requires a number of seconds")?;
                let secs: u64 = secs
                    .parse()
                    .map_err(|_| format!("invalid benchmark duration: {}", secs))?;
                if secs == 0 {
                    return Err("benchmark duration must be at least one second".to_string());
                }
                parsed.benchmark = Some(Duration::from_secs(secs));
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    if parsed.once && parsed.benchmark.is_some() {
        return Err("--once and --benchmark are mutually exclusive".to_string());
    }
    Ok(Command::Run(parsed))
}

fn print_help() {
    eprintln!("power-fetcher {} - INA226 power telemetry daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    power-fetcher [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH      Bus configuration (default {})", paths::default_config_path().display());
    eprintln!("    -o, --output PATH      Append JSON records to PATH instead of stdout");
    eprintln!("        --once             One scan/configure/read pass, then exit");
    eprintln!("        --benchmark SECS   Acquire for SECS seconds, print throughput, exit");
    eprintln!("        --simulate         Use simulated INA226 devices instead of /dev/i2c-N");
    eprintln!("    -v, --version          Print version");
    eprintln!("    -h, --help             Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}   Log filter (trace, debug, info, warn, error)", logging::LOG_ENV);
}

/// Explicit path must load; the default path falls back to the built-in tables
fn load_configuration(path: Option<&PathBuf>) -> anyhow::Result<AcquisitionConfig> {
    match path {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display())),
        None => {
            let default = paths::default_config_path();
            load_config_or_builtin(&default).with_context(|| format!("loading {}", default.display()))
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PHASE 1: Parse arguments
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("power-fetcher {}", VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    // PHASE 2: Logging
    let target = logging::init_logging();
    info!("STARTUP: power-fetcher {} starting", VERSION);
    info!("STARTUP: Logging to {}", target.describe());

    // PHASE 3: Configuration
    let config = match load_configuration(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    info!(
        buses = config.buses.len(),
        poll_ms = config.poll_interval_ms,
        scan_ms = config.scan_interval_ms,
        "STARTUP: configuration loaded"
    );

    // PHASE 4: Signals
    let stop = StopSignal::new();
    let signal_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - stopping acquisition");
        signal_stop.stop();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // PHASE 5: Acquisition
    let output = open_output(args.output.as_deref()).context("opening measurement output")?;
    let options = RunOptions {
        once: args.once,
        benchmark: args.benchmark,
    };

    let summary = if args.simulate {
        info!("STARTUP: simulated buses");
        let provider = daemon::simulated_provider(&config)?;
        daemon::run(&config, &provider, options, output, stop).await?
    } else {
        let provider = I2cDevProvider::from_buses(&config.buses);
        daemon::run(&config, &provider, options, output, stop).await?
    };

    // PHASE 6: Summary
    info!("SHUTDOWN: {}", summary);
    if args.benchmark.is_some() {
        eprintln!("{}", summary);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(parse(&[]).unwrap(), Command::Run(Args::default()));
    }

    #[test]
    fn test_parse_all_options() {
        let cmd = parse(&["-c", "/tmp/b.json", "--output", "/tmp/o.jsonl", "--simulate", "--benchmark", "5"]).unwrap();
        assert_eq!(
            cmd,
            Command::Run(Args {
                config: Some(PathBuf::from("/tmp/b.json")),
                output: Some(PathBuf::from("/tmp/o.jsonl")),
                once: false,
                benchmark: Some(Duration::from_secs(5)),
                simulate: true,
            })
        );
    }

    #[test]
    fn test_parse_help_and_version() {
        assert_eq!(parse(&["--once", "-h"]).unwrap(), Command::Help);
        assert_eq!(parse(&["-v"]).unwrap(), Command::Version);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let missing = PathBuf::from("/nonexistent/power-fetcher/buses.json");
        assert!(load_configuration(Some(&missing)).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--benchmark", "soon"]).is_err());
        assert!(parse(&["--benchmark", "0"]).is_err());
        assert!(parse(&["--once", "--benchmark", "3"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}
