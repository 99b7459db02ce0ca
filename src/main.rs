use anyhow::Context;
use chrono::Datelike;
use clap::Parser;
use earth_history_capture::capture::{run_capture_with, CaptureRequest};
use earth_history_capture::config::{CaptureConfig, DetectorSettings};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture Google Earth historical imagery for a location", long_about = None)]
struct Args {
    /// Location as "latitude,longitude", e.g. "5.5555,-0.2616"
    location: String,

    /// First year of interest
    #[arg(short, long, default_value_t = chrono::Utc::now().year() - 10)]
    start_year: i32,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that receives session folders
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of timeline positions to probe
    #[arg(long)]
    points: Option<usize>,

    /// Byte-size change threshold in percent
    #[arg(long)]
    threshold: Option<f64>,

    /// Label used for file names instead of the coordinates
    #[arg(long)]
    label: Option<String>,

    #[arg(long)]
    chrome_path: Option<String>,

    /// Disable the Chrome sandbox (containers, CI)
    #[arg(long)]
    no_sandbox: bool,

    /// Connect to a Chrome already listening on this debug port
    #[arg(long)]
    debug_port: Option<u16>,

    /// Skip the zip archive
    #[arg(long)]
    no_archive: bool,

    /// Estimate dates from timeline position only
    #[arg(long)]
    no_ocr: bool,
}

impl Args {
    fn apply(&self, config: &mut CaptureConfig) {
        if let Some(output) = &self.output {
            config.output_root = output.clone();
        }
        if let Some(points) = self.points {
            config.scan.num_points = points;
        }
        if let Some(threshold_percent) = self.threshold {
            config.detector = DetectorSettings::ByteSize { threshold_percent };
        }
        if let Some(path) = &self.chrome_path {
            config.browser.chrome_path = Some(path.clone());
        }
        if self.no_sandbox {
            config.browser.no_sandbox = true;
        }
        if let Some(port) = self.debug_port {
            config.browser.debug_port = Some(port);
        }
        if self.no_archive {
            config.create_archive = false;
        }
        if self.no_ocr {
            config.ocr.enabled = false;
        }
    }
}

async fn run(args: Args) -> anyhow::Result<PathBuf> {
    let mut config =
        CaptureConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    let mut request = CaptureRequest::new(&args.location, args.start_year, args.headless);
    if let Some(label) = &args.label {
        request = request.with_label(label);
    }

    log::info!(
        "Capturing {} from {} (headless: {})",
        args.location,
        args.start_year,
        args.headless
    );
    let output = run_capture_with(request, &config).await?;
    Ok(output)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args).await {
        Ok(output) => {
            log::info!("Capture complete");
            println!("{}", output.display());
        }
        Err(e) => {
            log::error!("Capture failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
