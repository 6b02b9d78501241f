//! Device abstraction layer for beam diagnostics
//!
//! Provides a unified interface for control-system access that can be backed
//! by a live accelerator connection (for production), a scripted mock (for
//! testing), or a disabled stub that returns random values (for exercising
//! the outer scan logic without hardware).
//!
//! Every device is addressed by string identifiers (process variable names
//! in EPICS terms). The transport behind an identifier is entirely up to the
//! implementation; all calls block until the value is available.

pub mod disabled;
pub mod mock;

use std::error::Error;
use std::fmt;

pub use disabled::DisabledDevice;
pub use mock::MockDevice;

/// Error type for device operations
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Identifier is not known to this device
    UnknownId(String),
    /// Read from the control system failed
    ReadError(String),
    /// Write to the control system failed
    WriteError(String),
    /// Connection to the control system is down
    Disconnected(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceError::UnknownId(id) => write!(f, "Unknown identifier: {id}"),
            DeviceError::ReadError(msg) => write!(f, "Read error: {msg}"),
            DeviceError::WriteError(msg) => write!(f, "Write error: {msg}"),
            DeviceError::Disconnected(msg) => write!(f, "Disconnected: {msg}"),
        }
    }
}

impl Error for DeviceError {}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Trait for unified control-system access
///
/// This trait abstracts the three operations the beam-size pipeline needs
/// so that the same acquisition code runs against hardware, test doubles
/// and offline stubs.
pub trait DeviceInterface: Send {
    /// Write an actuator setpoint
    ///
    /// # Arguments
    /// * `id` - Actuator identifier
    /// * `value` - Setpoint in the actuator's machine units
    fn set(&mut self, id: &str, value: f64) -> DeviceResult<()>;

    /// Read a scalar value
    ///
    /// # Arguments
    /// * `id` - Scalar identifier
    fn get_scalar(&mut self, id: &str) -> DeviceResult<f64>;

    /// Read an image waveform
    ///
    /// Returns the flat row-major pixel payload. Dimensions are published
    /// separately as scalars by the diagnostic.
    ///
    /// # Arguments
    /// * `id` - Image identifier
    fn get_image(&mut self, id: &str) -> DeviceResult<Vec<f64>>;

    /// Get device name/identifier
    ///
    /// Returns a human-readable name for this device instance
    fn name(&self) -> &str;
}

impl DeviceInterface for Box<dyn DeviceInterface> {
    fn set(&mut self, id: &str, value: f64) -> DeviceResult<()> {
        (**self).set(id, value)
    }

    fn get_scalar(&mut self, id: &str) -> DeviceResult<f64> {
        (**self).get_scalar(id)
    }

    fn get_image(&mut self, id: &str) -> DeviceResult<Vec<f64>> {
        (**self).get_image(id)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Read a scalar and interpret it as a non-negative dimension.
///
/// Image dimensions are published as floating point scalars by most control
/// systems; anything negative, fractional or non-finite is a read error.
pub fn get_dimension<D: DeviceInterface + ?Sized>(device: &mut D, id: &str) -> DeviceResult<usize> {
    let value = device.get_scalar(id)?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(DeviceError::ReadError(format!(
            "{id} returned {value}, expected a pixel count"
        )));
    }
    Ok(value as usize)
}
