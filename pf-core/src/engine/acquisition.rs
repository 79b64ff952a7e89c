//! Acquisition loop
//!
//! Drives one or more bus managers: refresh (scan + configure) every scan
//! interval, read every readable slot every poll interval, hand each
//! record to a [`MeasurementSink`]. The stop signal is checked between
//! cycles and between individual slot reads. A sink that stops accepting
//! records ends the loop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data::types::{timestamp_us, MeasurementRecord};
use crate::hw::bus::{BusManager, ScanReport};
use crate::hw::transceiver::BusTransceiver;

/// Cooperative stop signal shared between the loop and its owner
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`; returns true as soon as the signal is stopped
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = flag.lock();
        while !*stopped {
            if condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Receives records produced by the acquisition loop
pub trait MeasurementSink {
    /// Hand over one record; false once the consumer is gone
    fn submit(&mut self, record: MeasurementRecord) -> bool;
}

impl MeasurementSink for Vec<MeasurementRecord> {
    fn submit(&mut self, record: MeasurementRecord) -> bool {
        self.push(record);
        true
    }
}

impl MeasurementSink for std::sync::mpsc::Sender<MeasurementRecord> {
    fn submit(&mut self, record: MeasurementRecord) -> bool {
        self.send(record).is_ok()
    }
}

/// Throughput counters over a window
#[derive(Debug, Clone)]
pub struct AcquisitionStats {
    cycles: u64,
    records_ok: u64,
    records_failed: u64,
    read_time: Duration,
    window_start: Instant,
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self {
            cycles: 0,
            records_ok: 0,
            records_failed: 0,
            read_time: Duration::ZERO,
            window_start: Instant::now(),
        }
    }
}

impl AcquisitionStats {
    pub fn record(&mut self, ok: bool, elapsed: Duration) {
        if ok {
            self.records_ok += 1;
        } else {
            self.records_failed += 1;
        }
        self.read_time += elapsed;
    }

    pub fn cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn records(&self) -> u64 {
        self.records_ok + self.records_failed
    }

    pub fn summary(&self) -> StatsSummary {
        let elapsed_s = self.window_start.elapsed().as_secs_f64();
        let records = self.records();
        StatsSummary {
            cycles: self.cycles,
            records_ok: self.records_ok,
            records_failed: self.records_failed,
            elapsed_s,
            records_per_second: if elapsed_s > 0.0 {
                records as f64 / elapsed_s
            } else {
                0.0
            },
            mean_us_per_record: if records > 0 {
                self.read_time.as_secs_f64() * 1e6 / records as f64
            } else {
                0.0
            },
        }
    }

    /// Start a new window
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot of [`AcquisitionStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSummary {
    pub cycles: u64,
    pub records_ok: u64,
    pub records_failed: u64,
    pub elapsed_s: f64,
    pub records_per_second: f64,
    pub mean_us_per_record: f64,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycles, {} records ({} failed) in {:.1}s: {:.1} records/s, {:.1} us/record",
            self.cycles,
            self.records_ok + self.records_failed,
            self.records_failed,
            self.elapsed_s,
            self.records_per_second,
            self.mean_us_per_record
        )
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// Present when the cycle started with a refresh
    pub scan_reports: Vec<ScanReport>,
    pub records: usize,
    pub failed: usize,
    /// The stop signal cut the cycle short
    pub interrupted: bool,
    /// The sink stopped accepting records; the loop cannot continue
    pub sink_closed: bool,
}

pub struct Acquisition<T> {
    buses: Vec<BusManager<T>>,
    poll_interval: Duration,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    stats: AcquisitionStats,
    /// Counters since the last periodic log line
    window: AcquisitionStats,
    stats_interval: Option<Duration>,
}

impl<T: BusTransceiver> Acquisition<T> {
    pub fn new(buses: Vec<BusManager<T>>, poll_interval: Duration, scan_interval: Duration) -> Self {
        Self {
            buses,
            poll_interval,
            scan_interval,
            last_scan: None,
            stats: AcquisitionStats::default(),
            window: AcquisitionStats::default(),
            stats_interval: None,
        }
    }

    /// Log a throughput line every `interval` while running
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    pub fn buses(&self) -> &[BusManager<T>] {
        &self.buses
    }

    pub fn buses_mut(&mut self) -> &mut [BusManager<T>] {
        &mut self.buses
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut AcquisitionStats {
        &mut self.stats
    }

    pub fn scan_due(&self) -> bool {
        self.last_scan
            .map_or(true, |at| at.elapsed() >= self.scan_interval)
    }

    /// Scan and configure every bus now
    pub fn refresh_all(&mut self) -> Vec<ScanReport> {
        let first = self.last_scan.is_none();
        let reports: Vec<ScanReport> = self.buses.iter_mut().map(|b| b.refresh()).collect();
        self.last_scan = Some(Instant::now());

        for report in &reports {
            log_scan_report(report, first);
        }
        reports
    }

    /// One pass: refresh if due, then read every readable slot once
    pub fn run_cycle<S: MeasurementSink + ?Sized>(&mut self, sink: &mut S, stop: &StopSignal) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        if self.scan_due() {
            outcome.scan_reports = self.refresh_all();
        }

        for bus in self.buses.iter_mut() {
            for slot in bus.readable_slots() {
                if stop.is_stopped() {
                    outcome.interrupted = true;
                    return outcome;
                }

                let started = Instant::now();
                let result = bus.read_slot(slot);
                let elapsed = started.elapsed();

                let record = match result {
                    Ok(measurement) => MeasurementRecord::Ok(measurement),
                    Err(e) => {
                        outcome.failed += 1;
                        MeasurementRecord::Failed {
                            bus_index: bus.bus_index(),
                            slot_index: slot,
                            component_tag: tag_of(bus, slot),
                            timestamp_us: timestamp_us(),
                            kind: e.kind().to_string(),
                            reason: e.to_string(),
                        }
                    }
                };
                self.stats.record(record.is_ok(), elapsed);
                self.window.record(record.is_ok(), elapsed);
                outcome.records += 1;
                if !sink.submit(record) {
                    warn!(bus = bus.bus_index(), "measurement consumer gone, stopping acquisition");
                    outcome.sink_closed = true;
                    outcome.interrupted = true;
                    return outcome;
                }
            }
        }

        self.stats.cycle();
        self.window.cycle();
        outcome
    }

    /// Cycle every poll interval until stopped
    pub fn run<S: MeasurementSink + ?Sized>(&mut self, sink: &mut S, stop: &StopSignal) -> StatsSummary {
        info!(
            buses = self.buses.len(),
            poll_ms = self.poll_interval.as_millis() as u64,
            scan_ms = self.scan_interval.as_millis() as u64,
            "acquisition started"
        );

        while !stop.is_stopped() {
            let started = Instant::now();
            let outcome = self.run_cycle(sink, stop);
            if outcome.interrupted {
                break;
            }
            if outcome.failed > 0 {
                debug!(failed = outcome.failed, records = outcome.records, "cycle had failed reads");
            }
            self.log_window();

            let remaining = self.poll_interval.saturating_sub(started.elapsed());
            if stop.wait_timeout(remaining) {
                break;
            }
        }

        let summary = self.stats.summary();
        info!("acquisition stopped: {}", summary);
        summary
    }
}

impl<T> Acquisition<T> {
    fn log_window(&mut self) {
        if let Some(interval) = self.stats_interval {
            let summary = self.window.summary();
            if summary.elapsed_s >= interval.as_secs_f64() {
                info!(
                    records_per_second = summary.records_per_second,
                    mean_us = summary.mean_us_per_record,
                    failed = summary.records_failed,
                    "throughput: {}",
                    summary
                );
                self.window.reset();
            }
        }
    }
}

fn tag_of<T: BusTransceiver>(bus: &BusManager<T>, slot: usize) -> char {
    bus.table()
        .get(slot)
        .and_then(|s| s.descriptor.as_ref())
        .map_or('?', |d| d.component_tag)
}

fn log_scan_report(report: &ScanReport, first: bool) {
    if first {
        info!(
            bus = report.bus_index,
            configured = report.configured_count(),
            "{} devices configured",
            report.configured_count()
        );
        for tag in &report.missing {
            warn!(bus = report.bus_index, tag = %tag, "device missing");
        }
    } else if report.has_changes() {
        info!(
            bus = report.bus_index,
            online = report.online.len(),
            newly_online = ?report.newly_online,
            newly_offline = ?report.newly_offline,
            "bus membership changed"
        );
    }
    for tag in &report.configuration_failures {
        warn!(bus = report.bus_index, tag = %tag, "device could not be configured");
    }
}
