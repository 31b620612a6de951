use clap::Parser;
use guider_roi::{
    catalog::store::{DirectoryStore, StoreError},
    config::SelectorConfig,
    error::Error,
    geometry::{DetectorType, camera::Camera},
    selector::{GuiderRoiRequest, GuiderRoiSelector},
};
use std::{fs::File, io::BufWriter, path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uom::si::{angle::degree, f64::Angle};

/// Select guide stars and print the guider window configuration.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Boresight right ascension in degrees.
    #[arg(long, allow_negative_numbers = true)]
    ra: f64,

    /// Boresight declination in degrees.
    #[arg(long, allow_negative_numbers = true)]
    dec: f64,

    /// Position angle of the focal plane in degrees.
    #[arg(long, allow_negative_numbers = true)]
    position_angle: f64,

    #[arg(long, default_value_t = 400)]
    window_size: u32,

    #[arg(long, default_value_t = 200)]
    integration_time_ms: u32,

    #[arg(long, default_value = "i")]
    band: String,

    /// Detector types to place windows on; repeat for several.
    #[arg(long = "detector-type", default_value = "guider")]
    detector_types: Vec<DetectorType>,

    /// Overrides the configured edge margin in pixels.
    #[arg(long)]
    edge_margin: Option<u32>,

    /// Selector settings in TOML; defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera description in TOML; LSSTCam when absent.
    #[arg(long)]
    camera: Option<PathBuf>,

    /// Root of the catalog and vignetting store.
    #[arg(short, long)]
    store: PathBuf,

    /// Writes the selected stars as JSON.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn run(args: Args) -> Result<(), Error> {
    let config = match &args.config {
        Some(path) => SelectorConfig::load(path)?,
        None => SelectorConfig::default(),
    };
    let camera = match &args.camera {
        Some(path) => Camera::load(path)?,
        None => Camera::lsstcam(),
    };
    info!(camera = camera.name(), detectors = camera.detectors().len(), "loaded camera");

    let store = Arc::new(DirectoryStore::new(&args.store));
    let selector = GuiderRoiSelector::new(&config, Arc::new(camera), store.clone(), &*store)?;

    let mut request = GuiderRoiRequest::new(
        Angle::new::<degree>(args.ra),
        Angle::new::<degree>(args.dec),
        Angle::new::<degree>(args.position_angle),
        args.window_size,
        args.integration_time_ms,
        &args.band,
    )?
    .with_detector_types(args.detector_types)?;
    if let Some(margin) = args.edge_margin {
        request = request.with_edge_margin(margin);
    }

    let selection = selector.select(&request)?;
    println!("{}", selection.spec.to_config_text());

    if let Some(path) = &args.output {
        let file = File::create(path).map_err(|source| {
            StoreError::Write {
                path: path.clone(),
                source,
            }
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &selection.stars).map_err(|source| {
            StoreError::Encode {
                path: path.clone(),
                source,
            }
        })?;
        info!("wrote {} selected stars to {}", selection.stars.len(), path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("could not install log subscriber");
    }

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
