//! Acquisition engine modules
//!
//! Contains the calibration engine and the acquisition loop.

pub mod acquisition;
pub mod calibration;

pub use acquisition::{
    Acquisition, AcquisitionStats, CycleOutcome, MeasurementSink, StatsSummary, StopSignal,
};
pub use calibration::{convert, scale_for, RailDesign, RawRegisters, Reading};
