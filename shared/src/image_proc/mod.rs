//! Image processing pipeline for beam-size diagnostics.
//!
//! # Module Organization
//!
//! - **frame**: detector frame model (reshape, background subtraction, crop, projection)
//! - **roi**: region-of-interest window and bounds checking
//! - **profile_fit**: Gaussian fits of 1D projections into RMS sizes
//! - **io**: CSV matrix exchange for background images and processed frames
//! - **test_patterns**: synthetic Gaussian beam spots

pub mod frame;
pub mod io;
pub mod profile_fit;
pub mod roi;
pub mod test_patterns;

pub use frame::{Axis, Frame, FrameError};
pub use io::{read_csv_matrix, write_csv_matrix};
pub use profile_fit::{fit_profile, fit_sizes, SizeEstimate};
pub use roi::Roi;
