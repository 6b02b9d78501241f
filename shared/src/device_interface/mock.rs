use super::{DeviceError, DeviceInterface, DeviceResult};
use std::collections::HashMap;

/// Scripted device for tests.
///
/// Scalars come from a fixed table (writes update the table, so a setpoint
/// reads back). Image reads walk through a list of waveforms; a single
/// waveform repeats forever, a longer list is consumed in order and then
/// fails. Every write and every image read is recorded.
pub struct MockDevice {
    scalars: HashMap<String, f64>,
    images: Vec<Vec<f64>>,
    image_index: usize,
    image_reads: usize,
    writes: Vec<(String, f64)>,
}

impl MockDevice {
    pub fn new(images: Vec<Vec<f64>>) -> Self {
        Self {
            scalars: HashMap::new(),
            images,
            image_index: 0,
            image_reads: 0,
            writes: Vec::new(),
        }
    }

    pub fn new_repeating(image: Vec<f64>) -> Self {
        Self::new(vec![image])
    }

    pub fn with_scalar(mut self, id: &str, value: f64) -> Self {
        self.scalars.insert(id.to_string(), value);
        self
    }

    /// Register the dimension scalars of a screen diagnostic.
    pub fn with_dimensions(self, nrow_id: &str, nrow: usize, ncol_id: &str, ncol: usize) -> Self {
        self.with_scalar(nrow_id, nrow as f64)
            .with_scalar(ncol_id, ncol as f64)
    }

    /// All `(id, value)` writes in the order they were issued.
    pub fn writes(&self) -> &[(String, f64)] {
        &self.writes
    }

    /// Number of successful image reads so far.
    pub fn image_reads(&self) -> usize {
        self.image_reads
    }

    pub fn reset(&mut self) {
        self.image_index = 0;
        self.image_reads = 0;
        self.writes.clear();
    }

    fn next_image(&mut self) -> DeviceResult<Vec<f64>> {
        let idx = if self.images.len() == 1 {
            0
        } else {
            if self.image_index >= self.images.len() {
                return Err(DeviceError::ReadError("No more images".to_string()));
            }
            let current = self.image_index;
            self.image_index += 1;
            current
        };

        Ok(self.images[idx].clone())
    }
}

impl DeviceInterface for MockDevice {
    fn set(&mut self, id: &str, value: f64) -> DeviceResult<()> {
        self.writes.push((id.to_string(), value));
        self.scalars.insert(id.to_string(), value);
        Ok(())
    }

    fn get_scalar(&mut self, id: &str) -> DeviceResult<f64> {
        self.scalars
            .get(id)
            .copied()
            .ok_or_else(|| DeviceError::UnknownId(id.to_string()))
    }

    fn get_image(&mut self, _id: &str) -> DeviceResult<Vec<f64>> {
        let image = self.next_image()?;
        self.image_reads += 1;
        Ok(image)
    }

    fn name(&self) -> &str {
        "MockDevice"
    }
}
