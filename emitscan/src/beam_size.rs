//! Beam-size service for screen diagnostics.
//!
//! Wraps the sample acquisition loop in a batch-level retry loop and
//! converts the accepted pixel-unit result to meters. Batches are repeated
//! until the aggregated beam passes [`BatchAcceptance`] or `max_samples`
//! batches have been tried, after which the all-NaN sentinel is returned.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::device_interface::DeviceInterface;
use shared::image_proc::SizeEstimate;
use std::sync::Arc;
use tracing::{info, warn};

use crate::acquisition::{BatchResult, SampleAcquirer};
use crate::config::{MeasurementConfig, MeasurementThresholds};
use crate::error::{MeasurementError, MeasurementResult};
use crate::persistence::{
    timestamp_now, FileResultStore, NullResultStore, ResultStore, ScalarSnapshot, SummaryRecord,
};

/// Minimum product of fitted amplitude and amplitude threshold for a batch.
pub const AREA_FLOOR: f64 = 1500.0;

/// Beam sizes and uncertainties in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedBeamSize {
    pub xrms: f64,
    pub yrms: f64,
    pub xrms_err: f64,
    pub yrms_err: f64,
}

impl CalibratedBeamSize {
    /// Sentinel for a measurement that never produced an acceptable beam.
    pub fn nan() -> Self {
        Self {
            xrms: f64::NAN,
            yrms: f64::NAN,
            xrms_err: f64::NAN,
            yrms_err: f64::NAN,
        }
    }

    /// Scale pixel-unit estimates by `resolution` meters per pixel.
    pub fn from_pixels(x: &SizeEstimate, y: &SizeEstimate, resolution: f64) -> Self {
        Self {
            xrms: x.rms * resolution,
            yrms: y.rms * resolution,
            xrms_err: x.rms_error * resolution,
            yrms_err: y.rms_error * resolution,
        }
    }

    pub fn is_nan(&self) -> bool {
        self.xrms.is_nan() || self.yrms.is_nan()
    }
}

/// Batch-level acceptance rule.
///
/// Sizes are compared in meters, so the pixel thresholds are scaled by the
/// resolution read at the start of the measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchAcceptance {
    pub min_sigma_m: f64,
    pub max_sigma_m: f64,
    pub amp_threshold_x: f64,
    pub amp_threshold_y: f64,
    pub resolution: f64,
}

impl BatchAcceptance {
    pub fn new(thresholds: &MeasurementThresholds, resolution: f64) -> Self {
        Self {
            min_sigma_m: thresholds.min_sigma * resolution,
            max_sigma_m: thresholds.max_sigma * resolution,
            amp_threshold_x: thresholds.amp_threshold_x,
            amp_threshold_y: thresholds.amp_threshold_y,
            resolution,
        }
    }

    /// Every fitted quantity is finite, both widths lie strictly inside the
    /// sigma window, and both amplitudes clear their threshold and
    /// [`AREA_FLOOR`].
    pub fn accepts(&self, batch: &BatchResult) -> bool {
        let (x, y) = (&batch.x, &batch.y);
        let values = [
            x.rms,
            y.rms,
            x.rms_error,
            y.rms_error,
            x.amplitude,
            y.amplitude,
        ];
        if values.iter().any(|v| v.is_nan()) {
            return false;
        }

        let in_window = |rms: f64| {
            let meters = rms * self.resolution;
            self.min_sigma_m < meters && meters < self.max_sigma_m
        };
        let bright = |amp: f64, threshold: f64| amp >= threshold && amp * threshold >= AREA_FLOOR;

        in_window(x.rms)
            && in_window(y.rms)
            && bright(x.amplitude, self.amp_threshold_x)
            && bright(y.amplitude, self.amp_threshold_y)
    }
}

/// Outcome of [`BeamSizeService::measure_with_report`].
#[derive(Debug, Clone)]
pub struct MeasurementReport {
    pub beam_size: CalibratedBeamSize,
    /// Meters per pixel
    pub resolution: f64,
    /// Batches acquired, including the accepted one
    pub batches: usize,
    /// False when the batch retry bound was exhausted
    pub accepted: bool,
}

/// Calibrated beam-size measurement on one screen.
pub struct BeamSizeService {
    config: Arc<MeasurementConfig>,
    background: Option<Array2<f64>>,
    store: Box<dyn ResultStore>,
}

impl BeamSizeService {
    /// Loads the background frame once when subtraction is enabled.
    ///
    /// Results go to the configured `save_paths` when summaries or images
    /// are enabled; `with_store` overrides the destination.
    pub fn new(config: Arc<MeasurementConfig>) -> MeasurementResult<Self> {
        let background = config.load_background()?;
        if let Some(bg) = &background {
            info!("Loaded {}x{} background frame", bg.nrows(), bg.ncols());
        }
        let options = &config.persistence;
        let store: Box<dyn ResultStore> = if options.save_summary || options.save_images {
            Box::new(FileResultStore::new(config.save_paths.clone()))
        } else {
            Box::new(NullResultStore)
        };
        Ok(Self {
            config,
            background,
            store,
        })
    }

    pub fn with_store(mut self, store: Box<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn set_store(&mut self, store: Box<dyn ResultStore>) {
        self.store = store;
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Measure the beam size, returning the NaN sentinel when no batch passes.
    pub fn measure<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
    ) -> MeasurementResult<CalibratedBeamSize> {
        Ok(self.measure_with_report(device)?.beam_size)
    }

    pub fn measure_with_report<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
    ) -> MeasurementResult<MeasurementReport> {
        let resolution =
            device.get_scalar(&self.config.diagnostic.resolution)? * self.config.resolution_scale;
        let thresholds = self.config.thresholds();
        let acceptance = BatchAcceptance::new(&thresholds, resolution);
        let policy = self.config.averaging_policy();
        let acquirer = SampleAcquirer::new(&self.config, self.background.as_ref());

        let max_batches = if self.config.reject_bad_beam {
            thresholds.max_samples
        } else {
            1
        };

        let mut batches = 0;
        let mut accepted = None;
        let mut last = None;
        while batches < max_batches {
            if batches > 0 {
                info!("Low beam intensity/noisy or beam too small/large, repeating measurement");
            }
            let batch = acquirer.acquire_batch(device, policy)?;
            batches += 1;

            if !self.config.reject_bad_beam || acceptance.accepts(&batch) {
                accepted = Some(batch);
                break;
            }
            last = Some(batch);
        }

        let Some(batch) = accepted else {
            if let Some(batch) = &last {
                log_exhausted(batch, &acceptance, batches);
            }
            return Ok(MeasurementReport {
                beam_size: CalibratedBeamSize::nan(),
                resolution,
                batches,
                accepted: false,
            });
        };

        let beam_size = CalibratedBeamSize::from_pixels(&batch.x, &batch.y, resolution);
        info!(
            "Beam size x = {:.3e} +/- {:.1e} m, y = {:.3e} +/- {:.1e} m after {batches} batch(es)",
            beam_size.xrms, beam_size.xrms_err, beam_size.yrms, beam_size.yrms_err
        );

        self.persist(device, &batch, &beam_size, resolution, batches)?;

        Ok(MeasurementReport {
            beam_size,
            resolution,
            batches,
            accepted: true,
        })
    }

    fn persist<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
        batch: &BatchResult,
        beam_size: &CalibratedBeamSize,
        resolution: f64,
        batches: usize,
    ) -> MeasurementResult<()> {
        let options = &self.config.persistence;
        if !options.save_summary && !options.save_images {
            return Ok(());
        }
        let timestamp = timestamp_now();

        if options.save_images {
            if let Some(frame) = &batch.frame {
                let averaged = self.config.image_processing.avg_ims
                    && self.config.image_processing.n_to_acquire > 1;
                self.check_saved(self.store.save_image(frame, &timestamp, averaged))?;
            }
        }

        if options.save_summary {
            let actuator_value = device.get_scalar(&self.config.actuator.readback).ok();
            let record = SummaryRecord {
                timestamp: timestamp.clone(),
                xrms: beam_size.xrms,
                yrms: beam_size.yrms,
                xrms_err: beam_size.xrms_err,
                yrms_err: beam_size.yrms_err,
                resolution,
                diagnostic: self.config.diagnostic.image.clone(),
                actuator: self.config.actuator.control.clone(),
                actuator_value,
                batches,
            };
            self.check_saved(self.store.save_summary(&record))?;

            let mut values = vec![
                ("xrms".to_string(), beam_size.xrms),
                ("yrms".to_string(), beam_size.yrms),
                ("xrms_err".to_string(), beam_size.xrms_err),
                ("yrms_err".to_string(), beam_size.yrms_err),
            ];
            for id in &self.config.save_scalar_ids {
                let value = device.get_scalar(id).unwrap_or_else(|e| {
                    warn!("Could not read {id} for snapshot: {e}");
                    f64::NAN
                });
                values.push((id.clone(), value));
            }
            let snapshot = ScalarSnapshot { timestamp, values };
            self.check_saved(self.store.save_scalars(&snapshot))?;
        }
        Ok(())
    }

    fn check_saved(&self, result: std::io::Result<()>) -> MeasurementResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if self.config.persistence.fail_on_error => {
                Err(MeasurementError::Persistence(e.to_string()))
            }
            Err(e) => {
                warn!("Failed to save measurement results: {e}");
                Ok(())
            }
        }
    }
}

fn log_exhausted(batch: &BatchResult, acceptance: &BatchAcceptance, batches: usize) {
    info!("Bad beam after {batches} batches, returning NaN");
    for line in exhaustion_details(batch, acceptance) {
        info!("{line}");
    }
}

/// Fitted values of the last batch next to every acceptance threshold.
fn exhaustion_details(batch: &BatchResult, acceptance: &BatchAcceptance) -> Vec<String> {
    let (x, y) = (&batch.x, &batch.y);
    let res = acceptance.resolution;
    vec![
        format!(
            "xrms {:.3e} m, yrms {:.3e} m, window ({:.3e}, {:.3e}) m",
            x.rms * res,
            y.rms * res,
            acceptance.min_sigma_m,
            acceptance.max_sigma_m
        ),
        format!(
            "xrms_err {:.3e} m, yrms_err {:.3e} m",
            x.rms_error * res,
            y.rms_error * res
        ),
        format!(
            "xamp {:.1}, yamp {:.1}, thresholds {:.1}, {:.1}",
            x.amplitude, y.amplitude, acceptance.amp_threshold_x, acceptance.amp_threshold_y
        ),
        format!(
            "xamp*thr {:.1}, yamp*thr {:.1}, area floor {AREA_FLOOR:.1}",
            x.amplitude * acceptance.amp_threshold_x,
            y.amplitude * acceptance.amp_threshold_y
        ),
    ]
}
