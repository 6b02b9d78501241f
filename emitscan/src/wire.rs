//! Profile-wire scanner backend.
//!
//! A wire scan is started by writing 1 to the start id. The scan runs on
//! the control system; after `scan_time_s` the fitted widths are read back
//! in micrometers.

use shared::device_interface::DeviceInterface;
use std::time::Duration;
use tracing::{info, warn};

use crate::beam_size::CalibratedBeamSize;
use crate::config::{wait_duration, MeasurementConfig, WireIds};
use crate::error::{MeasurementError, MeasurementResult};

const MICROMETERS_TO_METERS: f64 = 1e-6;

pub struct WireScanBackend {
    ids: WireIds,
}

impl WireScanBackend {
    pub fn new(ids: WireIds) -> Self {
        Self { ids }
    }

    pub fn from_config(config: &MeasurementConfig) -> MeasurementResult<Self> {
        config
            .wire
            .clone()
            .map(Self::new)
            .ok_or_else(|| {
                MeasurementError::InvalidConfig("WIRE measurement needs a wire section".to_string())
            })
    }

    pub fn scan_time(&self) -> MeasurementResult<Duration> {
        wait_duration("wire scan_time_s", self.ids.scan_time_s)
    }

    /// Run one scan and return calibrated sizes.
    ///
    /// A width that is not a positive finite number yields the NaN sentinel.
    /// Missing uncertainty ids report zero error.
    pub fn measure<D: DeviceInterface + ?Sized>(
        &self,
        device: &mut D,
    ) -> MeasurementResult<CalibratedBeamSize> {
        let scan_time = self.scan_time()?;
        device.set(&self.ids.start, 1.0)?;
        info!("Wire scan started, waiting {:.1} s", self.ids.scan_time_s);
        std::thread::sleep(scan_time);

        let xrms = device.get_scalar(&self.ids.xrms)?;
        let yrms = device.get_scalar(&self.ids.yrms)?;
        if !(xrms.is_finite() && xrms > 0.0 && yrms.is_finite() && yrms > 0.0) {
            warn!("Wire scan returned invalid widths x = {xrms}, y = {yrms}");
            return Ok(CalibratedBeamSize::nan());
        }

        let mut read_error = |id: &Option<String>| -> MeasurementResult<f64> {
            match id {
                Some(id) => Ok(device.get_scalar(id)?),
                None => Ok(0.0),
            }
        };
        let xrms_err = read_error(&self.ids.xrms_err)?;
        let yrms_err = read_error(&self.ids.yrms_err)?;

        Ok(CalibratedBeamSize {
            xrms: xrms * MICROMETERS_TO_METERS,
            yrms: yrms * MICROMETERS_TO_METERS,
            xrms_err: xrms_err * MICROMETERS_TO_METERS,
            yrms_err: yrms_err * MICROMETERS_TO_METERS,
        })
    }
}
