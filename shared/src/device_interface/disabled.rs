use super::{DeviceInterface, DeviceResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Stub device used when no control-system connection is available.
///
/// Writes are accepted and dropped. Scalars are uniform random values in
/// `[0, 1)` and images are uniform noise of a fixed length, so nothing read
/// from this device carries a beam.
pub struct DisabledDevice {
    rng: StdRng,
    image_len: usize,
}

impl DisabledDevice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            image_len: 64 * 64,
        }
    }

    pub fn with_image_len(mut self, image_len: usize) -> Self {
        self.image_len = image_len;
        self
    }
}

impl DeviceInterface for DisabledDevice {
    fn set(&mut self, id: &str, value: f64) -> DeviceResult<()> {
        debug!("Device disabled, dropping write {id} = {value}");
        Ok(())
    }

    fn get_scalar(&mut self, _id: &str) -> DeviceResult<f64> {
        Ok(self.rng.gen::<f64>())
    }

    fn get_image(&mut self, _id: &str) -> DeviceResult<Vec<f64>> {
        Ok((0..self.image_len).map(|_| self.rng.gen::<f64>()).collect())
    }

    fn name(&self) -> &str {
        "DisabledDevice"
    }
}
