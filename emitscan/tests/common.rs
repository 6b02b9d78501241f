//! Common utilities for emitscan tests

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shared::device_interface::{DeviceError, DeviceInterface, DeviceResult};
use shared::image_proc::test_patterns::{add_read_noise, gaussian_beam};
use std::collections::HashMap;

pub const IMAGE: &str = "OTRS:IN20:571:IMAGE";
pub const NROW: &str = "OTRS:IN20:571:ROI_YNP";
pub const NCOL: &str = "OTRS:IN20:571:ROI_XNP";
pub const RESOLUTION: &str = "OTRS:IN20:571:RESOLUTION";
pub const QUAD_CTRL: &str = "QUAD:IN20:525:BCTRL";
pub const QUAD_ACT: &str = "QUAD:IN20:525:BACT";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Configuration JSON for the OTR screen used throughout the tests.
pub fn config_json(extra_image_processing: &str) -> String {
    format!(
        r#"{{
    "diagnostic": {{
        "image": "{IMAGE}",
        "nrow": "{NROW}",
        "ncol": "{NCOL}",
        "resolution": "{RESOLUTION}"
    }},
    "actuator": {{ "control": "{QUAD_CTRL}", "readback": "{QUAD_ACT}" }},
    "image_processing": {{
        "roi": {{ "xmin": 0, "xmax": 10, "ymin": 0, "ymax": 10 }},
        "amp_threshold": 10.0,
        "min_sigma": 1.0,
        "max_sigma": 50.0,
        "max_samples": 3,
        "avg_ims": false,
        "n_to_acquire": 1{extra_image_processing}
    }},
    "settle_time_s": 0.0
}}"#
    )
}

/// Screen whose beam width follows the quadrupole setting.
///
/// The RMS size in pixels is `sqrt(a * (k - k0)^2 + b)` for the last
/// written quad value `k`, mimicking the parabola of a quad scan.
pub struct QuadScanScreen {
    pub size: usize,
    pub resolution_um: f64,
    pub k0: f64,
    pub a: f64,
    pub b: f64,
    pub peak: f64,
    pub pedestal: f64,
    pub noise: f64,
    pub image_reads: usize,
    scalars: HashMap<String, f64>,
    rng: ChaCha8Rng,
}

impl QuadScanScreen {
    pub fn new(size: usize, resolution_um: f64) -> Self {
        let mut scalars = HashMap::new();
        scalars.insert(QUAD_CTRL.to_string(), 0.0);
        Self {
            size,
            resolution_um,
            k0: 0.5,
            a: 16.0,
            b: 36.0,
            peak: 200.0,
            pedestal: 0.0,
            noise: 0.0,
            image_reads: 0,
            scalars,
            rng: ChaCha8Rng::seed_from_u64(42),
        }
    }

    pub fn quad(&self) -> f64 {
        self.scalars.get(QUAD_CTRL).copied().unwrap_or(0.0)
    }

    /// Expected RMS in pixels at quad setting `k`.
    pub fn sigma_at(&self, k: f64) -> f64 {
        (self.a * (k - self.k0).powi(2) + self.b).sqrt()
    }

    pub fn render(&mut self) -> Array2<f64> {
        let sigma = self.sigma_at(self.quad());
        let center = self.size as f64 / 2.0;
        let mut image = gaussian_beam(
            self.size,
            self.size,
            (center, center),
            (sigma, sigma),
            self.peak,
            self.pedestal,
        );
        if self.noise > 0.0 {
            add_read_noise(&mut image, self.noise, &mut self.rng);
        }
        image
    }
}

impl DeviceInterface for QuadScanScreen {
    fn set(&mut self, id: &str, value: f64) -> DeviceResult<()> {
        self.scalars.insert(id.to_string(), value);
        if id == QUAD_CTRL {
            self.scalars.insert(QUAD_ACT.to_string(), value);
        }
        Ok(())
    }

    fn get_scalar(&mut self, id: &str) -> DeviceResult<f64> {
        match id {
            NROW | NCOL => Ok(self.size as f64),
            RESOLUTION => Ok(self.resolution_um),
            _ => self
                .scalars
                .get(id)
                .copied()
                .ok_or_else(|| DeviceError::UnknownId(id.to_string())),
        }
    }

    fn get_image(&mut self, id: &str) -> DeviceResult<Vec<f64>> {
        if id != IMAGE {
            return Err(DeviceError::UnknownId(id.to_string()));
        }
        self.image_reads += 1;
        Ok(self.render().iter().copied().collect())
    }

    fn name(&self) -> &str {
        "QuadScanScreen"
    }
}
