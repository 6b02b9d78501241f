//! Gaussian profile fitting for beam-size extraction.
//!
//! Each 1D projection of a beam frame is fitted with a Gaussian on a constant
//! pedestal,
//!
//! ```text
//! f(i) = offset + amplitude * exp(-(i - center)^2 / (2 * sigma^2))
//! ```
//!
//! using Levenberg-Marquardt iterations on the 4x4 normal equations. The
//! starting point comes from intensity moments of the pedestal-subtracted
//! projection.
//!
//! Degenerate projections (too short, non-finite, flat, all-zero, or a fit that
//! diverges) produce [`SizeEstimate::nan`] rather than an error so that the
//! acquisition loop can treat them as rejected samples.

use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};

use super::frame::{Axis, Frame};

/// Minimum number of samples needed to constrain the four fit parameters
/// and leave at least one degree of freedom.
pub const MIN_PROFILE_SAMPLES: usize = 5;

const MAX_ITERATIONS: usize = 200;
const RELATIVE_TOLERANCE: f64 = 1e-10;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e12;

/// Fitted size of one transverse axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeEstimate {
    /// RMS width (Gaussian sigma) in pixels
    pub rms: f64,
    /// One-sigma uncertainty on `rms` from the fit covariance
    pub rms_error: f64,
    /// Fitted peak height of the projection above its pedestal
    pub amplitude: f64,
}

impl SizeEstimate {
    pub fn new(rms: f64, rms_error: f64, amplitude: f64) -> Self {
        Self {
            rms,
            rms_error,
            amplitude,
        }
    }

    /// Estimate for a projection that could not be fitted.
    pub fn nan() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    /// True when the RMS width is NaN (the fit failed).
    pub fn is_nan(&self) -> bool {
        self.rms.is_nan()
    }
}

/// Fit parameters `[offset, amplitude, center, sigma]`.
type Params = Vector4<f64>;

fn model(params: &Params, i: f64) -> (f64, Vector4<f64>) {
    let (offset, amplitude, center, sigma) = (params[0], params[1], params[2], params[3]);
    let d = i - center;
    let s2 = sigma * sigma;
    let g = (-d * d / (2.0 * s2)).exp();
    let value = offset + amplitude * g;
    let gradient = Vector4::new(
        1.0,
        g,
        amplitude * g * d / s2,
        amplitude * g * d * d / (s2 * sigma),
    );
    (value, gradient)
}

fn cost(params: &Params, profile: &[f64]) -> f64 {
    profile
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let (f, _) = model(params, i as f64);
            (y - f).powi(2)
        })
        .sum()
}

fn normal_equations(params: &Params, profile: &[f64]) -> (Matrix4<f64>, Vector4<f64>) {
    let mut jtj = Matrix4::zeros();
    let mut jtr = Vector4::zeros();
    for (i, &y) in profile.iter().enumerate() {
        let (f, grad) = model(params, i as f64);
        jtj += grad * grad.transpose();
        jtr += grad * (y - f);
    }
    (jtj, jtr)
}

/// Moment-based starting point, or `None` when the profile carries no signal.
fn initial_guess(profile: &[f64]) -> Option<Params> {
    let min = profile.iter().copied().fold(f64::INFINITY, f64::min);
    let max = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let total: f64 = profile.iter().map(|&y| y - min).sum();
    if total <= 0.0 || max <= min {
        return None;
    }

    let center = profile
        .iter()
        .enumerate()
        .map(|(i, &y)| i as f64 * (y - min))
        .sum::<f64>()
        / total;
    let variance = profile
        .iter()
        .enumerate()
        .map(|(i, &y)| (i as f64 - center).powi(2) * (y - min))
        .sum::<f64>()
        / total;

    if variance <= 0.0 || !variance.is_finite() {
        return None;
    }

    Some(Vector4::new(min, max - min, center, variance.sqrt()))
}

/// Fit a Gaussian-on-pedestal to a 1D projection.
pub fn fit_profile(profile: &[f64]) -> SizeEstimate {
    let n = profile.len();
    if n < MIN_PROFILE_SAMPLES || profile.iter().any(|v| !v.is_finite()) {
        return SizeEstimate::nan();
    }

    let Some(mut params) = initial_guess(profile) else {
        return SizeEstimate::nan();
    };

    let mut current_cost = cost(&params, profile);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        if current_cost <= f64::MIN_POSITIVE {
            break;
        }

        let (jtj, jtr) = normal_equations(&params, profile);
        let mut damped = jtj;
        for k in 0..4 {
            damped[(k, k)] += damping * jtj[(k, k)].max(f64::EPSILON);
        }

        let Some(inverse) = damped.try_inverse() else {
            return SizeEstimate::nan();
        };
        let candidate = params + inverse * jtr;
        let candidate_cost = cost(&candidate, profile);

        if candidate_cost.is_finite() && candidate_cost < current_cost {
            let improvement = (current_cost - candidate_cost) / current_cost;
            params = candidate;
            current_cost = candidate_cost;
            damping = (damping / 10.0).max(f64::EPSILON);
            if improvement < RELATIVE_TOLERANCE {
                break;
            }
        } else {
            damping *= 10.0;
            if damping > MAX_DAMPING {
                break;
            }
        }
    }

    if params.iter().any(|p| !p.is_finite()) || params[3] == 0.0 {
        return SizeEstimate::nan();
    }

    let (jtj, _) = normal_equations(&params, profile);
    let rms_error = match jtj.try_inverse() {
        Some(covariance) => {
            let residual_variance = current_cost / (n - 4) as f64;
            let sigma_variance = residual_variance * covariance[(3, 3)];
            if sigma_variance >= 0.0 {
                sigma_variance.sqrt()
            } else {
                f64::NAN
            }
        }
        None => f64::NAN,
    };

    SizeEstimate::new(params[3].abs(), rms_error, params[1])
}

/// Project a frame on both axes and fit each projection.
///
/// Returns `(x, y)` estimates in pixel units.
pub fn fit_sizes(frame: &Frame) -> (SizeEstimate, SizeEstimate) {
    let x = frame.project(Axis::X);
    let y = frame.project(Axis::Y);
    (fit_profile(&x.to_vec()), fit_profile(&y.to_vec()))
}
