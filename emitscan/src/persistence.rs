//! Result persistence.
//!
//! Measurements can leave three kinds of artifacts behind: a JSON summary of
//! the calibrated beam size, a CSV snapshot of auxiliary scalars, and the
//! processed (or averaged) frame as a CSV matrix. File names carry a
//! local-time timestamp with microsecond resolution.

use serde::{Deserialize, Serialize};
use shared::image_proc::{write_csv_matrix, Frame};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::SavePaths;

/// Timestamp used in artifact file names.
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d_%H-%M-%S-%6f")
        .to_string()
}

/// Summary of one calibrated beam-size measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub timestamp: String,
    /// Beam sizes and uncertainties in meters
    pub xrms: f64,
    pub yrms: f64,
    pub xrms_err: f64,
    pub yrms_err: f64,
    /// Meters per pixel used for calibration
    pub resolution: f64,
    pub diagnostic: String,
    pub actuator: String,
    pub actuator_value: Option<f64>,
    /// Batches acquired before acceptance
    pub batches: usize,
}

/// Auxiliary scalars read at measurement time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarSnapshot {
    pub timestamp: String,
    pub values: Vec<(String, f64)>,
}

/// Sink for measurement artifacts.
pub trait ResultStore: Send {
    fn save_summary(&self, record: &SummaryRecord) -> io::Result<()>;

    fn save_scalars(&self, snapshot: &ScalarSnapshot) -> io::Result<()>;

    /// `averaged` marks a frame produced by averaging several images.
    fn save_image(&self, frame: &Frame, timestamp: &str, averaged: bool) -> io::Result<()>;
}

impl ResultStore for Box<dyn ResultStore> {
    fn save_summary(&self, record: &SummaryRecord) -> io::Result<()> {
        (**self).save_summary(record)
    }

    fn save_scalars(&self, snapshot: &ScalarSnapshot) -> io::Result<()> {
        (**self).save_scalars(snapshot)
    }

    fn save_image(&self, frame: &Frame, timestamp: &str, averaged: bool) -> io::Result<()> {
        (**self).save_image(frame, timestamp, averaged)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResultStore;

impl ResultStore for NullResultStore {
    fn save_summary(&self, _record: &SummaryRecord) -> io::Result<()> {
        Ok(())
    }

    fn save_scalars(&self, _snapshot: &ScalarSnapshot) -> io::Result<()> {
        Ok(())
    }

    fn save_image(&self, _frame: &Frame, _timestamp: &str, _averaged: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Writes artifacts under the configured save directories.
///
/// Summaries go to `summaries/beamsize_<ts>.json`, scalar snapshots to
/// `raw_saves/scalars_<ts>.csv` and frames to `images/img_<ts>.csv`
/// (`avg_img_<ts>.csv` for averaged frames). Directories are created on
/// first use.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    paths: SavePaths,
}

impl FileResultStore {
    pub fn new(paths: SavePaths) -> Self {
        Self { paths }
    }

    /// All three directories under a single root.
    pub fn with_root(root: &Path) -> Self {
        Self::new(SavePaths {
            summaries: root.join("summaries"),
            images: root.join("images"),
            raw_saves: root.join("raw_saves"),
        })
    }

    pub fn summary_path(&self, timestamp: &str) -> PathBuf {
        self.paths.summaries.join(format!("beamsize_{timestamp}.json"))
    }

    pub fn scalars_path(&self, timestamp: &str) -> PathBuf {
        self.paths.raw_saves.join(format!("scalars_{timestamp}.csv"))
    }

    pub fn image_path(&self, timestamp: &str, averaged: bool) -> PathBuf {
        let prefix = if averaged { "avg_img" } else { "img" };
        self.paths.images.join(format!("{prefix}_{timestamp}.csv"))
    }
}

impl ResultStore for FileResultStore {
    fn save_summary(&self, record: &SummaryRecord) -> io::Result<()> {
        let path = self.summary_path(&record.timestamp);
        fs::create_dir_all(&self.paths.summaries)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        debug!("Saved summary to {}", path.display());
        Ok(())
    }

    fn save_scalars(&self, snapshot: &ScalarSnapshot) -> io::Result<()> {
        let path = self.scalars_path(&snapshot.timestamp);
        fs::create_dir_all(&self.paths.raw_saves)?;

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["id", "value"])?;
        for (id, value) in &snapshot.values {
            writer.write_record([id.as_str(), value.to_string().as_str()])?;
        }
        writer.flush()?;
        debug!("Saved {} scalars to {}", snapshot.values.len(), path.display());
        Ok(())
    }

    fn save_image(&self, frame: &Frame, timestamp: &str, averaged: bool) -> io::Result<()> {
        let path = self.image_path(timestamp, averaged);
        write_csv_matrix(&frame.data(), &path)?;
        debug!("Saved {}x{} frame to {}", frame.nrow(), frame.ncol(), path.display());
        Ok(())
    }
}
