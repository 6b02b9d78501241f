//! Beam-size measurement tool.
//!
//! Runs the measurement front door against a synthetic screen (or a
//! disabled device) for one or more quadrupole settings and prints the
//! calibrated beam sizes.

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shared::algo::median;
use shared::device_interface::{DeviceInterface, DisabledDevice, MockDevice};
use shared::image_proc::test_patterns::{add_read_noise, gaussian_beam};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use emitscan::{FileResultStore, MachineIo, MeasurementConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Measure calibrated beam sizes on a profile screen")]
struct Args {
    #[arg(short = 'c', long, help = "Measurement configuration (JSON)")]
    config: PathBuf,

    #[arg(
        long,
        requires = "mock_sigma",
        help = "Acquire from the device instead of returning synthetic sizes"
    )]
    online: bool,

    #[arg(
        long,
        help = "Serve a synthetic Gaussian beam from a mock screen",
        value_name = "PIXELS"
    )]
    mock_sigma: Option<f64>,

    #[arg(long, default_value = "2.0", help = "Read noise of the mock screen (counts)")]
    mock_noise: f64,

    #[arg(long, default_value = "10.0", help = "Mock screen resolution (um/px)")]
    mock_resolution: f64,

    #[arg(long, default_value = "OTRS", help = "Measurement type (OTRS, SCREEN or WIRE)")]
    meas_type: String,

    #[arg(long, num_args = 1.., help = "Quadrupole settings to scan")]
    quad: Vec<f64>,

    #[arg(short = 'n', long, default_value = "1", help = "Measurements per setting")]
    repeat: usize,

    #[arg(long, help = "Seed for synthetic data")]
    seed: Option<u64>,

    #[arg(short = 'o', long, help = "Write summaries and images under this directory instead of save_paths")]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = MeasurementConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    let config = Arc::new(config);
    let seed = args.seed.unwrap_or(0);

    let device: Box<dyn DeviceInterface> = match args.mock_sigma {
        Some(sigma) => {
            info!("Using mock screen with sigma {sigma} px");
            Box::new(create_mock_screen(&config, &args, sigma, seed))
        }
        None => Box::new(DisabledDevice::new(seed)),
    };

    let mut machine = MachineIo::new(device, config.clone(), &args.meas_type)
        .map_err(|e| anyhow::anyhow!("Failed to initialize measurement: {e}"))?
        .with_online(args.online);
    if let Some(seed) = args.seed {
        machine = machine.with_seed(seed);
    }
    if let Some(dir) = &args.output_dir {
        machine = machine.with_store(Box::new(FileResultStore::with_root(dir)));
    }

    let settings: Vec<Option<f64>> = if args.quad.is_empty() {
        vec![None]
    } else {
        args.quad.iter().copied().map(Some).collect()
    };

    println!("quad,xrms_m,yrms_m,xrms_err_m,yrms_err_m");
    for setting in settings {
        let mut xs = Vec::with_capacity(args.repeat);
        let mut ys = Vec::with_capacity(args.repeat);

        for _ in 0..args.repeat {
            let size = machine
                .measure(setting)
                .map_err(|e| anyhow::anyhow!("Measurement failed: {e}"))?;
            let quad = setting.map_or_else(|| "-".to_string(), |v| v.to_string());
            println!(
                "{quad},{:e},{:e},{:e},{:e}",
                size.xrms, size.yrms, size.xrms_err, size.yrms_err
            );
            if !size.is_nan() {
                xs.push(size.xrms);
                ys.push(size.yrms);
            }
        }

        if args.repeat > 1 {
            match (median(&xs), median(&ys)) {
                (Ok(x), Ok(y)) => info!(
                    "Median over {} valid measurements: x = {x:.3e} m, y = {y:.3e} m",
                    xs.len()
                ),
                _ => warn!("No valid measurements for setting {setting:?}"),
            }
        }
    }

    Ok(())
}

fn create_mock_screen(
    config: &MeasurementConfig,
    args: &Args,
    sigma: f64,
    seed: u64,
) -> MockDevice {
    let size = ((sigma * 12.0).ceil() as usize).max(32);
    let center = size as f64 / 2.0;
    let mut image = gaussian_beam(size, size, (center, center), (sigma, sigma), 200.0, 10.0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    add_read_noise(&mut image, args.mock_noise, &mut rng);

    let ids = &config.diagnostic;
    MockDevice::new_repeating(image.iter().copied().collect())
        .with_dimensions(&ids.nrow, size, &ids.ncol, size)
        .with_scalar(&ids.resolution, args.mock_resolution)
        .with_scalar(&config.actuator.readback, 0.0)
}
