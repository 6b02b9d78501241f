//! Measurement front door.
//!
//! [`MachineIo`] is what an optimizer or scan driver talks to: optionally
//! move the actuator, wait for it to settle, then dispatch to the backend
//! named by the measurement-type selector. Offline it returns synthetic
//! beam sizes without touching the device.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::device_interface::DeviceInterface;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::beam_size::{BeamSizeService, CalibratedBeamSize};
use crate::config::{wait_duration, MeasurementConfig};
use crate::error::{MeasurementError, MeasurementResult};
use crate::persistence::ResultStore;
use crate::wire::WireScanBackend;

/// Offline horizontal beam size range, meters.
pub const OFFLINE_XRMS_RANGE: (f64, f64) = (0.5e-4, 5e-4);
/// Offline vertical beam size range, meters.
pub const OFFLINE_YRMS_RANGE: (f64, f64) = (1e-4, 6e-4);

/// Measurement backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Screen image with profile fitting
    Screen,
    /// Profile-wire scanner
    Wire,
}

impl MeasurementKind {
    /// Parse a selector; case-insensitive, `OTRS` and `SCREEN` both name the screen.
    pub fn parse(selector: &str) -> Option<Self> {
        match selector.trim().to_ascii_uppercase().as_str() {
            "OTRS" | "SCREEN" => Some(Self::Screen),
            "WIRE" => Some(Self::Wire),
            _ => None,
        }
    }
}

pub struct MachineIo<D: DeviceInterface> {
    device: D,
    config: Arc<MeasurementConfig>,
    selector: String,
    kind: Option<MeasurementKind>,
    online: bool,
    /// Built on the first live screen measurement
    screen: Option<BeamSizeService>,
    store: Option<Box<dyn ResultStore>>,
    rng: ChaCha8Rng,
}

impl<D: DeviceInterface> MachineIo<D> {
    /// Build a front door in offline mode.
    ///
    /// An unknown selector is accepted here and only fails when a live
    /// measurement is requested. The screen background is loaded on the
    /// first live screen measurement.
    pub fn new(device: D, config: Arc<MeasurementConfig>, selector: &str) -> MeasurementResult<Self> {
        Ok(Self {
            device,
            config,
            selector: selector.to_string(),
            kind: MeasurementKind::parse(selector),
            online: false,
            screen: None,
            store: None,
            rng: ChaCha8Rng::from_entropy(),
        })
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Seed the offline generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Send screen results to `store` instead of the configured save paths.
    pub fn with_store(mut self, store: Box<dyn ResultStore>) -> Self {
        match &mut self.screen {
            Some(screen) => screen.set_store(store),
            None => self.store = Some(store),
        }
        self
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn kind(&self) -> Option<MeasurementKind> {
        self.kind
    }

    pub fn settle_time(&self) -> MeasurementResult<Duration> {
        wait_duration("settle_time_s", self.config.settle_time_s)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Write the actuator setpoint and wait for the settle time.
    ///
    /// Offline this only logs the request.
    pub fn set_actuator(&mut self, value: f64) -> MeasurementResult<()> {
        let control = &self.config.actuator.control;
        if !self.online {
            info!("Offline, not setting {control} = {value}");
            return Ok(());
        }
        let settle = self.settle_time()?;
        self.device.set(control, value)?;
        debug!("Set {control} = {value}, settling {settle:?}");
        std::thread::sleep(settle);
        Ok(())
    }

    /// Measure the beam size, first moving the actuator when a value is given.
    ///
    /// Offline, nothing is written and sizes are drawn uniformly from
    /// [`OFFLINE_XRMS_RANGE`] and [`OFFLINE_YRMS_RANGE`] with zero errors.
    pub fn measure(&mut self, actuator_value: Option<f64>) -> MeasurementResult<CalibratedBeamSize> {
        if !self.online {
            return Ok(self.offline_sample());
        }

        if let Some(value) = actuator_value {
            self.set_actuator(value)?;
        }

        match self.kind {
            Some(MeasurementKind::Screen) => {
                let screen = match self.screen.take() {
                    Some(screen) => screen,
                    None => self.build_screen()?,
                };
                let result = screen.measure(&mut self.device);
                self.screen = Some(screen);
                result
            }
            Some(MeasurementKind::Wire) => {
                let wire = WireScanBackend::from_config(&self.config)?;
                wire.measure(&mut self.device)
            }
            None => Err(MeasurementError::UnsupportedMeasurementType(
                self.selector.clone(),
            )),
        }
    }

    fn build_screen(&mut self) -> MeasurementResult<BeamSizeService> {
        let mut screen = BeamSizeService::new(self.config.clone())?;
        if let Some(store) = self.store.take() {
            screen.set_store(store);
        }
        Ok(screen)
    }

    fn offline_sample(&mut self) -> CalibratedBeamSize {
        let (xlo, xhi) = OFFLINE_XRMS_RANGE;
        let (ylo, yhi) = OFFLINE_YRMS_RANGE;
        let size = CalibratedBeamSize {
            xrms: self.rng.gen_range(xlo..xhi),
            yrms: self.rng.gen_range(ylo..yhi),
            xrms_err: 0.0,
            yrms_err: 0.0,
        };
        info!(
            "Offline beam size x = {:.3e} m, y = {:.3e} m",
            size.xrms, size.yrms
        );
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::WireIds;
    use approx::assert_relative_eq;
    use shared::device_interface::MockDevice;
    use shared::image_proc::test_patterns::gaussian_beam_waveform;
    use std::time::Instant;

    fn screen_device(config: &MeasurementConfig) -> MockDevice {
        let ids = &config.diagnostic;
        let image = gaussian_beam_waveform(80, 80, (40.0, 40.0), (8.0, 12.0), 100.0, 0.0);
        MockDevice::new_repeating(image)
            .with_dimensions(&ids.nrow, 80, &ids.ncol, 80)
            .with_scalar(&ids.resolution, 1.0)
    }

    fn machine(selector: &str) -> MachineIo<MockDevice> {
        let config = test_config();
        let device = screen_device(&config);
        MachineIo::new(device, Arc::new(config), selector)
            .unwrap()
            .with_seed(7)
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(MeasurementKind::parse("OTRS"), Some(MeasurementKind::Screen));
        assert_eq!(MeasurementKind::parse("screen"), Some(MeasurementKind::Screen));
        assert_eq!(MeasurementKind::parse(" Wire "), Some(MeasurementKind::Wire));
        assert_eq!(MeasurementKind::parse("BUNCH_LENGTH"), None);
    }

    #[test]
    fn test_offline_ranges_and_no_writes() {
        let mut io = machine("OTRS");

        for _ in 0..200 {
            let size = io.measure(Some(3.0)).unwrap();
            assert!(size.xrms >= 0.5e-4 && size.xrms < 5e-4);
            assert!(size.yrms >= 1e-4 && size.yrms < 6e-4);
            assert_eq!(size.xrms_err, 0.0);
            assert_eq!(size.yrms_err, 0.0);
        }
        assert!(io.device().writes().is_empty());
        assert_eq!(io.device().image_reads(), 0);
    }

    #[test]
    fn test_offline_seed_is_reproducible() {
        let a = machine("OTRS").measure(None).unwrap();
        let b = machine("OTRS").measure(None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_offline_unknown_selector_still_samples() {
        let mut io = machine("BUNCH_LENGTH");
        assert!(io.measure(None).is_ok());
    }

    #[test]
    fn test_online_screen_sets_actuator_first() {
        let mut io = machine("OTRS").with_online(true);

        let size = io.measure(Some(-1.25)).unwrap();

        assert_eq!(
            io.device().writes(),
            &[("QUAD:IN20:525:BCTRL".to_string(), -1.25)]
        );
        assert_relative_eq!(size.xrms, 8e-6, max_relative = 1e-6);
        assert_relative_eq!(size.yrms, 12e-6, max_relative = 1e-6);
    }

    #[test]
    fn test_set_actuator_only_writes_online() {
        let mut io = machine("OTRS");
        io.set_actuator(1.0).unwrap();
        assert!(io.device().writes().is_empty());

        io.set_online(true);
        io.set_actuator(2.0).unwrap();
        assert_eq!(io.device().writes(), &[("QUAD:IN20:525:BCTRL".to_string(), 2.0)]);
    }

    #[test]
    fn test_online_without_value_skips_write_and_settle() {
        let mut config = test_config();
        config.settle_time_s = 0.2;
        let device = screen_device(&config);
        let mut io = MachineIo::new(device, Arc::new(config), "OTRS")
            .unwrap()
            .with_online(true);

        let start = Instant::now();
        io.measure(None).unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(io.device().writes().is_empty());
    }

    #[test]
    fn test_settle_time_observed() {
        let mut config = test_config();
        config.settle_time_s = 0.05;
        let device = screen_device(&config);
        let mut io = MachineIo::new(device, Arc::new(config), "OTRS")
            .unwrap()
            .with_online(true);

        let start = Instant::now();
        io.measure(Some(0.5)).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_oversized_settle_time_rejected_before_write() {
        let mut config = test_config();
        config.settle_time_s = 1e300;
        let device = screen_device(&config);
        let mut io = MachineIo::new(device, Arc::new(config), "OTRS")
            .unwrap()
            .with_online(true);

        assert!(matches!(
            io.measure(Some(1.0)),
            Err(MeasurementError::InvalidConfig(_))
        ));
        assert!(io.device().writes().is_empty());
    }

    #[test]
    fn test_background_loaded_only_for_live_screen() {
        let mut config = test_config();
        config.image_processing.subtract_bg = true;
        config.image_processing.background_image = Some("/nonexistent/bg.csv".into());
        let config = Arc::new(config);

        for selector in ["OTRS", "WIRE", "BUNCH_LENGTH"] {
            let mut io = MachineIo::new(screen_device(&config), config.clone(), selector).unwrap();
            assert!(io.measure(Some(1.0)).is_ok());
        }

        let mut io = MachineIo::new(screen_device(&config), config, "OTRS")
            .unwrap()
            .with_online(true);
        assert!(matches!(io.measure(None), Err(MeasurementError::Io(_))));
        assert_eq!(io.device().image_reads(), 0);
    }

    #[test]
    fn test_online_unsupported_selector() {
        let mut io = machine("BUNCH_LENGTH").with_online(true);

        match io.measure(None) {
            Err(MeasurementError::UnsupportedMeasurementType(selector)) => {
                assert_eq!(selector, "BUNCH_LENGTH")
            }
            other => panic!("expected unsupported type, got {other:?}"),
        }
    }

    #[test]
    fn test_online_wire_dispatch() {
        let mut config = test_config();
        config.wire = Some(WireIds {
            start: "WIRE:START".to_string(),
            xrms: "WIRE:XRMS".to_string(),
            yrms: "WIRE:YRMS".to_string(),
            xrms_err: None,
            yrms_err: None,
            scan_time_s: 0.0,
        });
        let device = MockDevice::new(vec![])
            .with_scalar("WIRE:XRMS", 50.0)
            .with_scalar("WIRE:YRMS", 70.0);
        let mut io = MachineIo::new(device, Arc::new(config), "WIRE")
            .unwrap()
            .with_online(true);

        let size = io.measure(None).unwrap();

        assert_relative_eq!(size.xrms, 50e-6);
        assert_relative_eq!(size.yrms, 70e-6);
        assert_eq!(io.device().image_reads(), 0);
    }
}
