//! EMITSCAN - beam-size acquisition for quadrupole-scan emittance measurements
//!
//! Reads beam images from a transverse profile screen, fits Gaussian
//! projections, and returns calibrated RMS beam sizes to the scan driver.
//! Flow per measurement: set actuator -> settle -> acquire batches -> fit -> calibrate

pub mod acquisition;
pub mod beam_size;
pub mod config;
pub mod error;
pub mod machine_io;
pub mod persistence;
pub mod wire;

// Re-export commonly used types for external use
pub use crate::acquisition::{BatchResult, BeamSizeSample, SampleAcquirer, SampleState};
pub use crate::beam_size::{BeamSizeService, CalibratedBeamSize, MeasurementReport};
pub use crate::config::{AveragingPolicy, MeasurementConfig, MeasurementThresholds, SavePaths};
pub use crate::error::{MeasurementError, MeasurementResult};
pub use crate::machine_io::{MachineIo, MeasurementKind};
pub use crate::persistence::{FileResultStore, NullResultStore, ResultStore};
