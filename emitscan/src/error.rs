use shared::device_interface::DeviceError;
use shared::image_proc::FrameError;
use thiserror::Error;

/// Errors produced by the beam-size measurement pipeline.
///
/// Out-of-bounds samples and all-NaN batches are not errors: they are
/// retried and finally reported as NaN beam sizes.
#[derive(Error, Debug)]
pub enum MeasurementError {
    /// Malformed image payload, ROI or background.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Control-system access failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The measurement-type selector names no known backend.
    #[error("unsupported measurement type: {0}")]
    UnsupportedMeasurementType(String),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Result persistence failed and was configured to be fatal.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Filesystem access outside persistence (configuration, background image).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for measurement operations.
pub type MeasurementResult<T> = Result<T, MeasurementError>;
