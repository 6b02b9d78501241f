//! Sample acquisition loop.
//!
//! A single beam image goes through `Acquiring -> Validating` and ends up
//! `Accepted`, or is retried until `max_samples` attempts have been made and
//! the last sample is returned `Exhausted`. Exhausted samples are not thrown
//! away: the decision to reject them belongs to the batch-level loop in
//! [`crate::beam_size`].
//!
//! A batch is `n_to_acquire` sequential samples combined by the configured
//! [`AveragingPolicy`].

use ndarray::Array2;
use shared::algo::{nan_mean, nan_standard_error};
use shared::device_interface::{get_dimension, DeviceInterface};
use shared::image_proc::{fit_sizes, Frame, SizeEstimate};
use tracing::{debug, info, warn};

use crate::config::{AveragingPolicy, MeasurementConfig, MeasurementThresholds};
use crate::error::MeasurementResult;

/// Fitted sizes of one acquired image together with the processed frame.
#[derive(Debug, Clone)]
pub struct BeamSizeSample {
    x: SizeEstimate,
    y: SizeEstimate,
    frame: Frame,
}

impl BeamSizeSample {
    pub fn new(x: SizeEstimate, y: SizeEstimate, frame: Frame) -> Self {
        Self { x, y, frame }
    }

    pub fn x(&self) -> &SizeEstimate {
        &self.x
    }

    pub fn y(&self) -> &SizeEstimate {
        &self.y
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Both axes produced a fit.
    pub fn is_valid(&self) -> bool {
        !self.x.is_nan() && !self.y.is_nan()
    }
}

/// Result of validating one acquired image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    /// Sample passed the thresholds
    Accepted,
    /// Sample failed, another attempt is allowed
    Retry,
    /// Sample failed on the last allowed attempt
    Exhausted,
}

/// Terminal outcome of the per-image retry loop.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub sample: BeamSizeSample,
    /// Either `Accepted` or `Exhausted`
    pub state: SampleState,
    /// Number of images read to reach this outcome
    pub attempts: usize,
}

/// Aggregated sizes of a batch, in pixel units.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub x: SizeEstimate,
    pub y: SizeEstimate,
    /// Averaged frame (average-images) or first frame (average-fits)
    pub frame: Option<Frame>,
    /// Images that passed the per-image thresholds
    pub accepted_images: usize,
}

impl BatchResult {
    pub fn all_nan() -> Self {
        Self {
            x: SizeEstimate::nan(),
            y: SizeEstimate::nan(),
            frame: None,
            accepted_images: 0,
        }
    }
}

/// Runs the per-image retry loop and batch aggregation for one screen.
pub struct SampleAcquirer<'a> {
    config: &'a MeasurementConfig,
    background: Option<&'a Array2<f64>>,
    thresholds: MeasurementThresholds,
}

impl<'a> SampleAcquirer<'a> {
    /// `background` is subtracted from every frame when present.
    pub fn new(config: &'a MeasurementConfig, background: Option<&'a Array2<f64>>) -> Self {
        Self {
            config,
            background,
            thresholds: config.thresholds(),
        }
    }

    pub fn thresholds(&self) -> &MeasurementThresholds {
        &self.thresholds
    }

    /// Read, preprocess and fit a single image.
    pub fn acquire_image<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
    ) -> MeasurementResult<BeamSizeSample> {
        let ids = &self.config.diagnostic;
        let ip = &self.config.image_processing;

        let ncol = get_dimension(device, &ids.ncol)?;
        let nrow = get_dimension(device, &ids.nrow)?;
        let raw = device.get_image(&ids.image)?;

        let mut frame = Frame::reshape(raw, nrow, ncol)?;
        if let Some(background) = self.background {
            frame = frame.subtract_background(&background.view())?;
        }
        if ip.use_roi {
            frame = frame.crop(&ip.roi)?;
        }

        let (x, y) = fit_sizes(&frame);
        Ok(BeamSizeSample::new(x, y, frame))
    }

    /// Classify a sample taken on attempt number `attempts` (1-based).
    pub fn validate(&self, sample: &BeamSizeSample, attempts: usize) -> SampleState {
        if self.thresholds.accepts(sample.x(), sample.y()) {
            SampleState::Accepted
        } else if attempts >= self.thresholds.max_samples {
            SampleState::Exhausted
        } else {
            SampleState::Retry
        }
    }

    /// Acquire images until one passes the thresholds or the retry bound is hit.
    pub fn acquire_sample<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
    ) -> MeasurementResult<SampleOutcome> {
        let mut attempts = 0;
        loop {
            let sample = self.acquire_image(device)?;
            attempts += 1;

            match self.validate(&sample, attempts) {
                SampleState::Retry => {
                    debug!(
                        "Image rejected (xrms {:.2}, yrms {:.2}, xamp {:.1}, yamp {:.1}), attempt {attempts}",
                        sample.x().rms,
                        sample.y().rms,
                        sample.x().amplitude,
                        sample.y().amplitude
                    );
                }
                state => {
                    return Ok(SampleOutcome {
                        sample,
                        state,
                        attempts,
                    })
                }
            }
        }
    }

    /// Acquire `n_to_acquire` samples and combine them with `policy`.
    pub fn acquire_batch<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
        policy: AveragingPolicy,
    ) -> MeasurementResult<BatchResult> {
        let num_images = self.config.image_processing.n_to_acquire;
        let mut outcomes = Vec::with_capacity(num_images);

        for i in 0..num_images {
            let outcome = self.acquire_sample(device)?;
            if outcome.state == SampleState::Exhausted {
                info!("Beam params out of bounds in image {i} out of {num_images} samples");
            }
            outcomes.push(outcome);
        }

        match policy {
            AveragingPolicy::AverageImages => self.average_images(outcomes),
            AveragingPolicy::AverageFits => Ok(average_fits(outcomes)),
        }
    }

    /// Average the processed frames unconditionally, then fit once.
    fn average_images(&self, outcomes: Vec<SampleOutcome>) -> MeasurementResult<BatchResult> {
        let num_images = outcomes.len();
        let accepted_images = count_accepted(&outcomes);
        let all_nan = outcomes.iter().all(|o| o.sample.x().is_nan());
        if all_nan {
            warn!("All {num_images} image fits are NaN, averaging images anyway");
        }

        let frames: Vec<Frame> = outcomes
            .into_iter()
            .map(|o| o.sample.into_frame())
            .collect();
        let averaged = Frame::mean_of(&frames)?;
        let (x, y) = fit_sizes(&averaged);

        if !self.thresholds.accepts(&x, &y) {
            if all_nan {
                info!("Beam params out of bounds in averaged image, initial {num_images} all NaNs");
            } else {
                info!("Beam params out of bounds in averaged image");
            }
        }

        Ok(BatchResult {
            x,
            y,
            frame: Some(averaged),
            accepted_images,
        })
    }
}

fn count_accepted(outcomes: &[SampleOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| o.state == SampleState::Accepted)
        .count()
}

/// Average per-image fits over the samples where both axes were fitted.
///
/// The error is the standard error of the mean (population standard
/// deviation over the square root of the valid count), so a single valid
/// sample reports zero error.
fn average_fits(outcomes: Vec<SampleOutcome>) -> BatchResult {
    let valid: Vec<&BeamSizeSample> = outcomes
        .iter()
        .map(|o| &o.sample)
        .filter(|s| s.is_valid())
        .collect();

    if valid.is_empty() {
        info!("All points are NaNs");
        return BatchResult::all_nan();
    }

    let combine = |pick: fn(&BeamSizeSample) -> &SizeEstimate| {
        let rms: Vec<f64> = valid.iter().map(|s| pick(s).rms).collect();
        let amp: Vec<f64> = valid.iter().map(|s| pick(s).amplitude).collect();
        SizeEstimate::new(nan_mean(&rms), nan_standard_error(&rms), nan_mean(&amp))
    };
    let x = combine(BeamSizeSample::x);
    let y = combine(BeamSizeSample::y);

    let accepted_images = count_accepted(&outcomes);
    let frame = outcomes.into_iter().next().map(|o| o.sample.into_frame());

    BatchResult {
        x,
        y,
        frame,
        accepted_images,
    }
}
