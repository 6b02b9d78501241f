//! Measurement configuration.
//!
//! One JSON document describes a diagnostic station: the identifiers of the
//! screen (or wire) and the scanned actuator, the image-processing settings,
//! and where results are written. It is loaded and validated once, then
//! shared read-only by every component of a measurement session.

use serde::{Deserialize, Serialize};
use shared::image_proc::{read_csv_matrix, Roi, SizeEstimate};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MeasurementError, MeasurementResult};
use ndarray::Array2;

/// Identifiers of the screen diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticIds {
    /// Image waveform
    pub image: String,
    /// Number of image rows
    pub nrow: String,
    /// Number of image columns
    pub ncol: String,
    /// Pixel resolution, in units of `resolution_scale` meters per pixel
    pub resolution: String,
}

/// Identifiers of the scanned actuator (quadrupole).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorIds {
    /// Setpoint
    pub control: String,
    /// Readback
    pub readback: String,
}

/// Identifiers of a profile-wire scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireIds {
    /// Writing 1 starts a scan
    pub start: String,
    /// Horizontal RMS in micrometers
    pub xrms: String,
    /// Vertical RMS in micrometers
    pub yrms: String,
    /// Horizontal RMS uncertainty in micrometers
    #[serde(default)]
    pub xrms_err: Option<String>,
    /// Vertical RMS uncertainty in micrometers
    #[serde(default)]
    pub yrms_err: Option<String>,
    /// Blocking wait for a scan to complete, in seconds
    #[serde(default = "default_wire_scan_time")]
    pub scan_time_s: f64,
}

fn default_wire_scan_time() -> f64 {
    5.0
}

/// Image-processing settings. Sizes are in pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessing {
    /// Subtract `background_image` from every acquired frame
    #[serde(default)]
    pub subtract_bg: bool,
    /// CSV matrix holding the background frame
    #[serde(default)]
    pub background_image: Option<PathBuf>,
    /// Crop every frame to `roi`
    #[serde(default)]
    pub use_roi: bool,
    pub roi: Roi,
    /// Minimum fitted projection amplitude on either axis
    pub amp_threshold: f64,
    /// Exclusive lower bound on the fitted RMS
    pub min_sigma: f64,
    /// Exclusive upper bound on the fitted RMS
    pub max_sigma: f64,
    /// Retry bound, per image and per batch
    pub max_samples: usize,
    /// Average frames before fitting instead of averaging per-frame fits
    pub avg_ims: bool,
    /// Images acquired per batch
    pub n_to_acquire: usize,
}

/// Output directories for persisted results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavePaths {
    pub summaries: PathBuf,
    pub images: PathBuf,
    pub raw_saves: PathBuf,
}

/// What gets persisted, and whether a failed write aborts the measurement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceOptions {
    #[serde(default)]
    pub save_summary: bool,
    #[serde(default)]
    pub save_images: bool,
    #[serde(default)]
    pub fail_on_error: bool,
}

/// Complete configuration of one measurement station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub diagnostic: DiagnosticIds,
    pub actuator: ActuatorIds,
    #[serde(default)]
    pub wire: Option<WireIds>,
    pub image_processing: ImageProcessing,
    /// Meters per unit of the resolution reading (the PV reports µm/px)
    #[serde(default = "default_resolution_scale")]
    pub resolution_scale: f64,
    /// Wait after moving the actuator before measuring, in seconds
    #[serde(default = "default_settle_time")]
    pub settle_time_s: f64,
    /// Repeat whole batches until the aggregated beam passes the thresholds
    #[serde(default = "default_true")]
    pub reject_bad_beam: bool,
    #[serde(default)]
    pub save_paths: SavePaths,
    /// Extra scalars recorded alongside every saved measurement
    #[serde(default)]
    pub save_scalar_ids: Vec<String>,
    #[serde(default)]
    pub persistence: PersistenceOptions,
}

fn default_resolution_scale() -> f64 {
    1e-6
}

fn default_settle_time() -> f64 {
    1.0
}

/// Longest settle or wire scan wait accepted, seconds.
pub const MAX_WAIT_S: f64 = 3600.0;

/// Convert a configured wait into a sleep duration.
pub(crate) fn wait_duration(name: &str, seconds: f64) -> MeasurementResult<Duration> {
    if !(0.0..=MAX_WAIT_S).contains(&seconds) {
        return Err(MeasurementError::InvalidConfig(format!(
            "{name} must be within [0, {MAX_WAIT_S}] s, got {seconds}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn default_true() -> bool {
    true
}

impl MeasurementConfig {
    /// Load and validate a JSON configuration file.
    pub fn load_from_file(path: &Path) -> MeasurementResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            MeasurementError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> MeasurementResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MeasurementError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> MeasurementResult<()> {
        let ip = &self.image_processing;
        let invalid = |msg: String| Err(MeasurementError::InvalidConfig(msg));

        if !(ip.min_sigma >= 0.0 && ip.min_sigma < ip.max_sigma) {
            return invalid(format!(
                "sigma range must satisfy 0 <= min_sigma < max_sigma, got [{}, {}]",
                ip.min_sigma, ip.max_sigma
            ));
        }
        if !(ip.amp_threshold >= 0.0) {
            return invalid(format!("amp_threshold must be >= 0, got {}", ip.amp_threshold));
        }
        if ip.max_samples == 0 {
            return invalid("max_samples must be at least 1".to_string());
        }
        if ip.n_to_acquire == 0 {
            return invalid("n_to_acquire must be at least 1".to_string());
        }
        if ip.use_roi && (ip.roi.width() == 0 || ip.roi.height() == 0) {
            return invalid(format!("ROI {} is empty", ip.roi));
        }
        if ip.subtract_bg && ip.background_image.is_none() {
            return invalid("subtract_bg requires background_image".to_string());
        }
        if !(self.resolution_scale.is_finite() && self.resolution_scale > 0.0) {
            return invalid(format!(
                "resolution_scale must be positive, got {}",
                self.resolution_scale
            ));
        }
        wait_duration("settle_time_s", self.settle_time_s)?;
        if let Some(wire) = &self.wire {
            wait_duration("wire scan_time_s", wire.scan_time_s)?;
        }
        Ok(())
    }

    /// Retry thresholds in pixel units.
    pub fn thresholds(&self) -> MeasurementThresholds {
        MeasurementThresholds::from_image_processing(&self.image_processing)
    }

    /// Aggregation policy selected by `avg_ims`.
    pub fn averaging_policy(&self) -> AveragingPolicy {
        if self.image_processing.avg_ims {
            AveragingPolicy::AverageImages
        } else {
            AveragingPolicy::AverageFits
        }
    }

    /// Load the background frame when subtraction is enabled.
    pub fn load_background(&self) -> MeasurementResult<Option<Array2<f64>>> {
        let ip = &self.image_processing;
        match (&ip.background_image, ip.subtract_bg) {
            (Some(path), true) => Ok(Some(read_csv_matrix(path)?)),
            _ => Ok(None),
        }
    }
}

/// How repeated images are combined into one size estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragingPolicy {
    /// Average frames pixel by pixel, then fit once
    AverageImages,
    /// Fit every frame, then average the fitted sizes
    AverageFits,
}

/// Acceptance thresholds for a single image, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementThresholds {
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub amp_threshold_x: f64,
    pub amp_threshold_y: f64,
    pub max_samples: usize,
}

impl MeasurementThresholds {
    pub fn from_image_processing(ip: &ImageProcessing) -> Self {
        Self {
            min_sigma: ip.min_sigma,
            max_sigma: ip.max_sigma,
            amp_threshold_x: ip.amp_threshold,
            amp_threshold_y: ip.amp_threshold,
            max_samples: ip.max_samples,
        }
    }

    /// True when both axes have enough amplitude and a width strictly inside
    /// `(min_sigma, max_sigma)`. NaN estimates never pass.
    pub fn accepts(&self, x: &SizeEstimate, y: &SizeEstimate) -> bool {
        let in_range = |rms: f64| self.min_sigma < rms && rms < self.max_sigma;
        x.amplitude >= self.amp_threshold_x
            && y.amplitude >= self.amp_threshold_y
            && in_range(x.rms)
            && in_range(y.rms)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn test_config() -> MeasurementConfig {
        MeasurementConfig {
            diagnostic: DiagnosticIds {
                image: "OTRS:IN20:571:IMAGE".to_string(),
                nrow: "OTRS:IN20:571:ROI_YNP".to_string(),
                ncol: "OTRS:IN20:571:ROI_XNP".to_string(),
                resolution: "OTRS:IN20:571:RESOLUTION".to_string(),
            },
            actuator: ActuatorIds {
                control: "QUAD:IN20:525:BCTRL".to_string(),
                readback: "QUAD:IN20:525:BACT".to_string(),
            },
            wire: None,
            image_processing: ImageProcessing {
                subtract_bg: false,
                background_image: None,
                use_roi: false,
                roi: Roi::new(0, 10, 0, 10),
                amp_threshold: 10.0,
                min_sigma: 1.0,
                max_sigma: 50.0,
                max_samples: 3,
                avg_ims: false,
                n_to_acquire: 1,
            },
            resolution_scale: 1e-6,
            settle_time_s: 0.0,
            reject_bad_beam: true,
            save_paths: SavePaths::default(),
            save_scalar_ids: Vec::new(),
            persistence: PersistenceOptions::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_sigma_range() {
        let mut config = test_config();
        config.image_processing.min_sigma = 60.0;
        assert!(matches!(
            config.validate(),
            Err(MeasurementError::InvalidConfig(_))
        ));

        config.image_processing.min_sigma = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_counts() {
        let mut config = test_config();
        config.image_processing.max_samples = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.image_processing.n_to_acquire = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_times_bounded() {
        let mut config = test_config();
        config.settle_time_s = MAX_WAIT_S;
        assert!(config.validate().is_ok());

        for bad in [1e300, f64::INFINITY, f64::NAN, -0.1] {
            config.settle_time_s = bad;
            assert!(
                matches!(config.validate(), Err(MeasurementError::InvalidConfig(_))),
                "settle_time_s {bad} accepted"
            );
        }

        let mut config = test_config();
        config.wire = Some(WireIds {
            start: "WIRE:START".to_string(),
            xrms: "WIRE:XRMS".to_string(),
            yrms: "WIRE:YRMS".to_string(),
            xrms_err: None,
            yrms_err: None,
            scan_time_s: 1e300,
        });
        assert!(matches!(
            config.validate(),
            Err(MeasurementError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_background_required_for_subtraction() {
        let mut config = test_config();
        config.image_processing.subtract_bg = true;
        assert!(config.validate().is_err());

        config.image_processing.background_image = Some(PathBuf::from("bg.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_roi_rejected_only_when_used() {
        let mut config = test_config();
        config.image_processing.roi = Roi::new(5, 5, 0, 10);
        assert!(config.validate().is_ok());

        config.image_processing.use_roi = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("station.json");
        test_config().save_to_file(&path).unwrap();

        let loaded = MeasurementConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.diagnostic.image, "OTRS:IN20:571:IMAGE");
        assert_eq!(loaded.image_processing.max_samples, 3);

        // Optional sections fall back to defaults
        let minimal = r#"{
            "diagnostic": {"image": "I", "nrow": "R", "ncol": "C", "resolution": "RES"},
            "actuator": {"control": "Q", "readback": "QR"},
            "image_processing": {
                "roi": {"xmin": 0, "xmax": 10, "ymin": 0, "ymax": 10},
                "amp_threshold": 150.0, "min_sigma": 1.0, "max_sigma": 60.0,
                "max_samples": 3, "avg_ims": true, "n_to_acquire": 2
            }
        }"#;
        let path = dir.path().join("minimal.json");
        std::fs::write(&path, minimal).unwrap();
        let loaded = MeasurementConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.resolution_scale, 1e-6);
        assert_eq!(loaded.settle_time_s, 1.0);
        assert!(loaded.reject_bad_beam);
        assert!(!loaded.persistence.save_summary);
        assert_eq!(loaded.averaging_policy(), AveragingPolicy::AverageImages);
    }

    #[test]
    fn test_malformed_json_is_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MeasurementConfig::load_from_file(&path),
            Err(MeasurementError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_threshold_acceptance() {
        let t = test_config().thresholds();
        let good = SizeEstimate::new(10.0, 0.1, 200.0);

        assert!(t.accepts(&good, &good));
        // Bounds are exclusive
        assert!(!t.accepts(&SizeEstimate::new(1.0, 0.1, 200.0), &good));
        assert!(!t.accepts(&good, &SizeEstimate::new(50.0, 0.1, 200.0)));
        // Amplitude floor is inclusive
        assert!(t.accepts(&SizeEstimate::new(10.0, 0.1, 10.0), &good));
        assert!(!t.accepts(&SizeEstimate::new(10.0, 0.1, 9.9), &good));
        // NaN never passes
        assert!(!t.accepts(&SizeEstimate::nan(), &good));
    }

    #[test]
    fn test_threshold_acceptance_is_monotonic() {
        let narrow = test_config().thresholds();
        let wide = MeasurementThresholds {
            min_sigma: 0.5,
            max_sigma: 80.0,
            amp_threshold_x: 5.0,
            amp_threshold_y: 5.0,
            max_samples: 3,
        };

        let samples = [0.2, 0.9, 1.5, 10.0, 49.0, 50.0, 60.0, 90.0];
        let amps = [1.0, 6.0, 10.0, 500.0];
        for &rx in &samples {
            for &ry in &samples {
                for &amp in &amps {
                    let x = SizeEstimate::new(rx, 0.0, amp);
                    let y = SizeEstimate::new(ry, 0.0, amp);
                    if narrow.accepts(&x, &y) {
                        assert!(wide.accepts(&x, &y), "widening rejected ({rx}, {ry}, {amp})");
                    }
                }
            }
        }
    }

    #[test]
    fn test_load_background() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bg.csv");
        std::fs::write(&path, "1,2\n3,4\n").unwrap();

        let mut config = test_config();
        config.image_processing.background_image = Some(path);
        assert!(config.load_background().unwrap().is_none());

        config.image_processing.subtract_bg = true;
        let bg = config.load_background().unwrap().unwrap();
        assert_eq!(bg.dim(), (2, 2));
        assert_eq!(bg[[1, 0]], 3.0);
    }
}
