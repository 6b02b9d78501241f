//! Synthetic beam images for validating the sizing pipeline
//!
//! Generates Gaussian beam spots on a flat pedestal, optionally with
//! additive read noise, in the same row-major layout a screen diagnostic
//! delivers.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Generate an axis-aligned Gaussian beam spot
///
/// # Arguments
/// * `nrow` - Number of rows (pixels along y)
/// * `ncol` - Number of columns (pixels along x)
/// * `center` - Spot center as (x, y) in pixels
/// * `sigma` - RMS widths as (sigma_x, sigma_y) in pixels
/// * `peak` - Peak intensity above the pedestal
/// * `pedestal` - Constant level added to every pixel
///
/// # Returns
/// Array2 of shape (nrow, ncol) containing the spot
pub fn gaussian_beam(
    nrow: usize,
    ncol: usize,
    center: (f64, f64),
    sigma: (f64, f64),
    peak: f64,
    pedestal: f64,
) -> Array2<f64> {
    let (cx, cy) = center;
    let (sx, sy) = sigma;
    Array2::from_shape_fn((nrow, ncol), |(row, col)| {
        let dx = col as f64 - cx;
        let dy = row as f64 - cy;
        pedestal + peak * (-(dx * dx) / (2.0 * sx * sx) - (dy * dy) / (2.0 * sy * sy)).exp()
    })
}

/// Same spot as [`gaussian_beam`], flattened to the row-major waveform a
/// device image read returns.
pub fn gaussian_beam_waveform(
    nrow: usize,
    ncol: usize,
    center: (f64, f64),
    sigma: (f64, f64),
    peak: f64,
    pedestal: f64,
) -> Vec<f64> {
    gaussian_beam(nrow, ncol, center, sigma, peak, pedestal)
        .into_iter()
        .collect()
}

/// Add zero-mean Gaussian noise with standard deviation `std_dev` to every pixel
pub fn add_read_noise<R: Rng>(image: &mut Array2<f64>, std_dev: f64, rng: &mut R) {
    if std_dev <= 0.0 {
        return;
    }
    let Ok(normal) = Normal::new(0.0, std_dev) else {
        return;
    };
    image.mapv_inplace(|v| v + normal.sample(&mut *rng));
}
