//! Shared components for beam-size diagnostics.
//!
//! This crate contains the frame model, profile fitting, statistics helpers
//! and device abstraction used by the quad-scan acquisition pipeline.

pub mod algo;
pub mod device_interface;
pub mod image_proc;
