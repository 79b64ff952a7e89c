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

//! Worker orchestration
//!
//! Each worker is a blocking task that owns its bus managers outright, so
//! slot tables are never shared between threads. Records from all workers
//! meet in one channel drained by the reporter.

use std::io::Write;
use std::time::Duration;

use pf_core::{
    Acquisition, AcquisitionConfig, BusManager, BusTransceiver, SimulatedBus, SimulatedProvider,
    StatsSummary, StopSignal, TransceiverProvider,
};
use tracing::{error, info, warn};

use crate::report::{run_reporter, ChannelSink, JsonLinesWriter};

/// How long the daemon runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// One scan/configure/read pass, then exit
    pub once: bool,
    /// Run for this long, then exit
    pub benchmark: Option<Duration>,
}

/// Open every configured bus; buses that fail to open are skipped
pub fn open_buses<P: TransceiverProvider>(
    config: &AcquisitionConfig,
    provider: &P,
) -> pf_core::Result<Vec<BusManager<P::Transceiver>>> {
    let mut buses = Vec::new();

    for (bus, table) in config.device_tables()? {
        match provider.open(bus.index, config.clock_frequency_hz) {
            Ok(transceiver) => {
                info!(
                    bus = bus.index,
                    populated = table.populated_count(),
                    "bus opened"
                );
                buses.push(
                    BusManager::new(bus.index, transceiver, table)
                        .with_transaction_timeout(config.transaction_timeout())
                        .with_expected_manufacturer_id(config.expected_manufacturer_id),
                );
            }
            Err(e) => {
                error!(bus = bus.index, error = %e, "bus unavailable, skipping");
            }
        }
    }

    Ok(buses)
}

/// Simulated INA226 devices at every populated address of the configuration
pub fn simulated_provider(config: &AcquisitionConfig) -> pf_core::Result<SimulatedProvider> {
    let mut provider = SimulatedProvider::new();
    for (bus, table) in config.device_tables()? {
        provider.insert(bus.index, SimulatedBus::populated_from(&table));
    }
    Ok(provider)
}

/// Group bus managers into workers
pub fn build_workers<T: BusTransceiver>(
    buses: Vec<BusManager<T>>,
    config: &AcquisitionConfig,
) -> Vec<Acquisition<T>> {
    let make = |group: Vec<BusManager<T>>| {
        Acquisition::new(group, config.poll_interval(), config.scan_interval())
            .with_stats_interval(config.stats_interval())
    };

    if buses.is_empty() {
        return Vec::new();
    }
    if config.per_bus_workers {
        buses.into_iter().map(|bus| make(vec![bus])).collect()
    } else {
        vec![make(buses)]
    }
}

/// Run every worker to completion on the blocking pool
pub async fn run_workers<T: BusTransceiver + 'static>(
    workers: Vec<Acquisition<T>>,
    sink: ChannelSink,
    stop: StopSignal,
    once: bool,
) -> Vec<StatsSummary> {
    let mut handles = Vec::with_capacity(workers.len());

    for mut worker in workers {
        let mut sink = sink.clone();
        let stop = stop.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            if once {
                worker.run_cycle(&mut sink, &stop);
                worker.stats().summary()
            } else {
                worker.run(&mut sink, &stop)
            }
        }));
    }
    drop(sink);

    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!(error = %e, "acquisition worker failed"),
        }
    }
    summaries
}

/// Totals over several workers running side by side
pub fn combine(summaries: &[StatsSummary]) -> StatsSummary {
    let cycles = summaries.iter().map(|s| s.cycles).sum();
    let records_ok: u64 = summaries.iter().map(|s| s.records_ok).sum();
    let records_failed: u64 = summaries.iter().map(|s| s.records_failed).sum();
    let elapsed_s = summaries.iter().map(|s| s.elapsed_s).fold(0.0, f64::max);
    let records = records_ok + records_failed;
    let busy_us: f64 = summaries
        .iter()
        .map(|s| s.mean_us_per_record * (s.records_ok + s.records_failed) as f64)
        .sum();

    StatsSummary {
        cycles,
        records_ok,
        records_failed,
        elapsed_s,
        records_per_second: if elapsed_s > 0.0 {
            records as f64 / elapsed_s
        } else {
            0.0
        },
        mean_us_per_record: if records > 0 {
            busy_us / records as f64
        } else {
            0.0
        },
    }
}

/// Open buses, run the workers and the reporter until done or stopped
pub async fn run<P: TransceiverProvider>(
    config: &AcquisitionConfig,
    provider: &P,
    options: RunOptions,
    output: Box<dyn Write + Send>,
    stop: StopSignal,
) -> anyhow::Result<StatsSummary> {
    let buses = open_buses(config, provider)?;
    if buses.is_empty() {
        warn!("no bus could be opened, nothing to acquire");
    }
    let workers = build_workers(buses, config);
    info!(workers = workers.len(), "starting acquisition workers");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let reporter = tokio::spawn(run_reporter(rx, JsonLinesWriter::new(output), stop.clone()));

    if let Some(duration) = options.benchmark {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!("benchmark period elapsed");
            stop.stop();
        });
    }

    let summaries = run_workers(workers, ChannelSink::new(tx), stop, options.once).await;
    let written = reporter.await??;

    let summary = combine(&summaries);
    info!(records = written, "reporter finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(records_ok: u64, elapsed_s: f64, mean_us: f64) -> StatsSummary {
        StatsSummary {
            cycles: 1,
            records_ok,
            records_failed: 0,
            elapsed_s,
            records_per_second: records_ok as f64 / elapsed_s,
            mean_us_per_record: mean_us,
        }
    }

    #[test]
    fn test_combine_summaries() {
        let total = combine(&[summary(100, 2.0, 100.0), summary(300, 1.0, 200.0)]);
        assert_eq!(total.records_ok, 400);
        assert_eq!(total.cycles, 2);
        assert!((total.elapsed_s - 2.0).abs() < 1e-12);
        assert!((total.records_per_second - 200.0).abs() < 1e-9);
        assert!((total.mean_us_per_record - 175.0).abs() < 1e-9);
    }

    #[test]
    fn test_combine_empty() {
        let total = combine(&[]);
        assert_eq!(total.records_ok, 0);
        assert_eq!(total.records_per_second, 0.0);
    }

    #[test]
    fn test_build_workers() {
        let config = AcquisitionConfig::builtin();
        let provider = simulated_provider(&config).unwrap();

        let buses = open_buses(&config, &provider).unwrap();
        assert_eq!(buses.len(), 3);
        assert_eq!(build_workers(buses, &config).len(), 3);

        let single = AcquisitionConfig {
            per_bus_workers: false,
            ..config
        };
        let buses = open_buses(&single, &provider).unwrap();
        let workers = build_workers(buses, &single);
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].buses().len(), 3);
    }

    #[test]
    fn test_unavailable_bus_is_skipped() {
        let config = AcquisitionConfig::builtin();
        let mut provider = SimulatedProvider::new();
        provider.insert(1, SimulatedBus::new());

        let buses = open_buses(&config, &provider).unwrap();
        assert_eq!(buses.len(), 1);
        assert_eq!(buses[0].bus_index(), 1);
    }
}
