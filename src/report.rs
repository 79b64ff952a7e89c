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

//! Measurement reporting
//!
//! Workers push records into an unbounded channel; a single reporter task
//! drains it and writes one JSON object per line.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use pf_core::{MeasurementRecord, MeasurementSink, StopSignal};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// Sink handing records to the reporter task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<MeasurementRecord>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<MeasurementRecord>) -> Self {
        Self { tx }
    }
}

impl MeasurementSink for ChannelSink {
    fn submit(&mut self, record: MeasurementRecord) -> bool {
        if self.tx.send(record).is_err() {
            debug!("reporter gone, record dropped");
            return false;
        }
        true
    }
}

/// Writes records as JSON lines
pub struct JsonLinesWriter<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write_record(&mut self, record: &MeasurementRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Output stream: the file at `path` (appended) or stdout
pub fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Drain the channel until every sender is gone; returns the record count
///
/// An output error stops acquisition through `stop` before it is returned.
pub async fn run_reporter<W: Write>(
    mut rx: UnboundedReceiver<MeasurementRecord>,
    mut writer: JsonLinesWriter<W>,
    stop: StopSignal,
) -> io::Result<u64> {
    let result = drain(&mut rx, &mut writer).await;
    if let Err(e) = &result {
        error!(error = %e, written = writer.written(), "measurement output failed, stopping acquisition");
        stop.stop();
    }
    result
}

async fn drain<W: Write>(
    rx: &mut UnboundedReceiver<MeasurementRecord>,
    writer: &mut JsonLinesWriter<W>,
) -> io::Result<u64> {
    while let Some(record) = rx.recv().await {
        writer.write_record(&record)?;
        // flush once the burst of a cycle has been written
        if rx.is_empty() {
            writer.flush()?;
        }
    }
    writer.flush()?;
    Ok(writer.written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::Measurement;

    fn measurement(slot: usize) -> MeasurementRecord {
        MeasurementRecord::Ok(Measurement {
            bus_index: 0,
            slot_index: slot,
            component_tag: 'H',
            bus_voltage: 12.0,
            shunt_voltage: 0.001,
            current: 0.5,
            power: 6.0,
            timestamp_us: 1_700_000_000_000_000,
        })
    }

    #[test]
    fn test_json_lines() {
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.write_record(&measurement(0)).unwrap();
        writer
            .write_record(&MeasurementRecord::Failed {
                bus_index: 1,
                slot_index: 2,
                component_tag: 'C',
                timestamp_us: 5,
                kind: "uncalibrated".to_string(),
                reason: "slot 2 on bus 1 has no usable calibration".to_string(),
            })
            .unwrap();
        assert_eq!(writer.written(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["status"], "ok");
        assert_eq!(first["component_tag"], "H");
        assert_eq!(first["current"], 0.5);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "failed");
        assert_eq!(second["kind"], "uncalibrated");
    }

    #[tokio::test]
    async fn test_reporter_drains_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        for slot in 0..5 {
            sink.submit(measurement(slot));
        }
        drop(sink);

        let stop = StopSignal::new();
        let written = run_reporter(rx, JsonLinesWriter::new(Vec::new()), stop.clone())
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert!(!stop.is_stopped());
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_output_failure_stops_acquisition() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        assert!(sink.submit(measurement(0)));

        let stop = StopSignal::new();
        let result = run_reporter(rx, JsonLinesWriter::new(ClosedPipe), stop.clone()).await;
        assert!(result.is_err());
        assert!(stop.is_stopped());

        // the receiver is gone, so the workers see a closed sink
        assert!(!sink.submit(measurement(1)));
    }

    #[test]
    fn test_open_output_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "existing\n").unwrap();
        {
            let mut out = open_output(Some(&path)).unwrap();
            out.write_all(b"line\n").unwrap();
            out.flush().unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "existing\nline\n");
    }
}
