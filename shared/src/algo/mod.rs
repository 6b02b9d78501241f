//! Numeric helpers shared by the acquisition pipeline.

pub mod stats;

pub use stats::{median, nan_mean, nan_population_std, nan_standard_error};
