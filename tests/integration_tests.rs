/*
 * Integration tests for power-fetcher
 *
 * These tests drive the daemon library end to end against simulated
 * buses: configuration loading, worker orchestration, acquisition and
 * JSON-lines reporting.
 */

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use pf_core::{
    load_config, Acquisition, AcquisitionConfig, BusConfig, BusManager, Fault, ReadError,
    SimulatedBus, SimulatedProvider, SlotEntry, StopSignal,
};
use power_fetcher::daemon::{self, RunOptions};
use power_fetcher::logging;
use serial_test::serial;

// Test utilities

/// Built-in tables with a known scale on every rail
fn fully_calibrated_config() -> AcquisitionConfig {
    let mut config = AcquisitionConfig::builtin();
    for bus in &mut config.buses {
        for entry in bus.slots.iter_mut().flatten() {
            let lsb = entry.current_lsb.unwrap_or(0.001);
            *entry = entry.clone().with_current_lsb(lsb).with_power_lsb(lsb * 25.0);
        }
    }
    config.poll_interval_ms = 5;
    config
}

fn write_config(dir: &Path, config: &AcquisitionConfig) -> std::path::PathBuf {
    let path = dir.join("buses.json");
    let mut file = File::create(&path).unwrap();
    file.write_all(serde_json::to_string_pretty(config).unwrap().as_bytes())
        .unwrap();
    path
}

fn read_records(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

async fn run_once(config: &AcquisitionConfig, provider: &SimulatedProvider, out: &Path) {
    let output = Box::new(File::create(out).unwrap());
    daemon::run(
        config,
        provider,
        RunOptions {
            once: true,
            benchmark: None,
        },
        output,
        StopSignal::new(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_once_two_buses_twelve_records() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.jsonl");
    let config = fully_calibrated_config();
    let provider = daemon::simulated_provider(&config).unwrap();

    run_once(&config, &provider, &out).await;

    let records = read_records(&out);
    assert_eq!(records.len(), 12);
    assert!(records.iter().all(|r| r["status"] == "ok"));

    let mut tags: Vec<String> = records
        .iter()
        .map(|r| r["component_tag"].as_str().unwrap().to_string())
        .collect();
    tags.sort();
    assert_eq!(tags.concat(), "ABCDEFHIJKLM");
}

#[tokio::test]
async fn test_builtin_tables_mark_unknown_scales() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.jsonl");
    let config = AcquisitionConfig::builtin();
    let provider = daemon::simulated_provider(&config).unwrap();

    run_once(&config, &provider, &out).await;

    let records = read_records(&out);
    assert_eq!(records.len(), 12);
    let ok: Vec<&serde_json::Value> = records.iter().filter(|r| r["status"] == "ok").collect();
    // only the 0x0D55 rails (H, I) have a known scale
    assert_eq!(ok.len(), 2);
    assert!(records
        .iter()
        .filter(|r| r["status"] == "failed")
        .all(|r| r["kind"] == "uncalibrated"));

    let h = ok.iter().find(|r| r["component_tag"] == "H").unwrap();
    assert_eq!(h["bus_index"], 0);
    assert!(h["bus_voltage"].as_f64().unwrap() > 11.0);
}

#[tokio::test]
async fn test_missing_bus_device_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.jsonl");
    let config = fully_calibrated_config();
    let tables = config.device_tables().unwrap();

    let mut provider = SimulatedProvider::new();
    provider.insert(1, SimulatedBus::populated_from(&tables[1].1));

    run_once(&config, &provider, &out).await;

    let records = read_records(&out);
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r["bus_index"] == 1));
}

#[tokio::test]
async fn test_benchmark_stops_on_time() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.jsonl");
    let config = AcquisitionConfig {
        per_bus_workers: false,
        ..fully_calibrated_config()
    };
    let provider = daemon::simulated_provider(&config).unwrap();

    let started = std::time::Instant::now();
    let summary = daemon::run(
        &config,
        &provider,
        RunOptions {
            once: false,
            benchmark: Some(Duration::from_millis(200)),
        },
        Box::new(File::create(&out).unwrap()),
        StopSignal::new(),
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(summary.cycles >= 1);
    assert!(summary.records_per_second > 0.0);
    assert_eq!(read_records(&out).len() as u64, summary.records_ok + summary.records_failed);
}

#[tokio::test]
async fn test_external_stop_signal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.jsonl");
    let config = fully_calibrated_config();
    let provider = daemon::simulated_provider(&config).unwrap();

    let stop = StopSignal::new();
    let remote = stop.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        remote.stop();
    });

    let summary = daemon::run(
        &config,
        &provider,
        RunOptions::default(),
        Box::new(File::create(&out).unwrap()),
        stop,
    )
    .await
    .unwrap();
    assert!(summary.records_ok >= 12);
}

struct ClosedStdout;

impl Write for ClosedStdout {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_output_failure_ends_daemon() {
    let config = AcquisitionConfig::builtin();
    let provider = daemon::simulated_provider(&config).unwrap();
    let stop = StopSignal::new();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        daemon::run(
            &config,
            &provider,
            RunOptions::default(),
            Box::new(ClosedStdout),
            stop.clone(),
        ),
    )
    .await
    .expect("daemon kept running after its output failed");

    assert!(result.is_err());
    assert!(stop.is_stopped());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = fully_calibrated_config();
    let path = write_config(dir.path(), &config);

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_file_rejects_duplicate_address() {
    let dir = tempfile::tempdir().unwrap();
    let config = AcquisitionConfig {
        buses: vec![BusConfig::new(
            0,
            vec![
                Some(SlotEntry::new(0x40, 'H', 0x0D55)),
                Some(SlotEntry::new(0x40, 'I', 0x0D55)),
            ],
        )],
        ..AcquisitionConfig::default()
    };
    let path = write_config(dir.path(), &config);
    assert!(load_config(&path).is_err());
}

#[test]
fn test_slot_goes_offline_between_scans() {
    let config = fully_calibrated_config();
    let tables = config.device_tables().unwrap();
    let (bus, table) = &tables[1];
    let sim = SimulatedBus::populated_from(table);
    let manager = BusManager::new(bus.index, sim.clone(), table.clone());
    let mut acquisition = Acquisition::new(vec![manager], Duration::from_millis(1), Duration::ZERO);

    let mut records = Vec::new();
    acquisition.run_cycle(&mut records, &StopSignal::new());
    assert_eq!(records.len(), 6);

    // E disappears; the next cycle rescans first
    sim.inject(0x44, Fault::Nack);
    records.clear();
    let outcome = acquisition.run_cycle(&mut records, &StopSignal::new());
    assert_eq!(outcome.scan_reports[0].newly_offline, vec!['E']);
    assert_eq!(records.len(), 5);

    let manager = &mut acquisition.buses_mut()[0];
    assert_eq!(
        manager.read_slot(4),
        Err(ReadError::InvalidSlot { bus: 1, slot: 4 })
    );
}

#[test]
fn test_reconfigure_after_device_reset() {
    let config = fully_calibrated_config();
    let tables = config.device_tables().unwrap();
    let (bus, table) = &tables[0];
    let sim = SimulatedBus::populated_from(table);
    let mut manager = BusManager::new(bus.index, sim.clone(), table.clone());

    manager.refresh();
    let before = manager.read_slot(2).unwrap();
    assert!(before.current > 0.0);

    // a power cycle clears calibration; the next refresh restores it
    sim.set_register(0x42, pf_core::Register::Calibration, 0);
    sim.set_rail(0x42, 480, 9280);
    assert_eq!(manager.read_slot(2).unwrap().current, 0.0);

    manager.refresh();
    let after = manager.read_slot(2).unwrap();
    assert!((after.current - before.current).abs() < 1e-9);
}

#[test]
#[serial]
fn test_log_filter_environment() {
    std::env::set_var(logging::LOG_ENV, "debug");
    assert_eq!(logging::log_filter(), "debug");
    std::env::remove_var(logging::LOG_ENV);
    assert_eq!(logging::log_filter(), "info");
}

#[test]
fn test_example_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/buses.example.json");
    let config = load_config(&path).unwrap();
    assert_eq!(config.expected_manufacturer_id, Some(0x5449));

    let tables = config.device_tables().unwrap();
    let bus0 = &tables[0].1;
    let calibrated: String = bus0
        .populated()
        .filter(|(_, d)| d.is_calibrated())
        .map(|(_, d)| d.component_tag)
        .collect();
    assert_eq!(calibrated, "HIJK");
    // words are carried through untouched
    let cals: Vec<u16> = bus0.populated().map(|(_, d)| d.calibration_word).collect();
    assert_eq!(cals, vec![0x0D55, 0x0D55, 0x0A00, 0x0A00, 0x3348, 0x3348]);
}
