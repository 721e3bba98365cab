mod align;
mod attribution;
mod browser;
mod capture_name;
mod config;
mod diagnostics;
mod error;
mod geometry;
mod ocr;
mod preprocess;
mod scrape;
mod stabilize;
mod url_date;

use anyhow::{bail, Result};
use browser::ChromeSession;
use clap::{ArgAction, Args, Parser, Subcommand};
use config::{ScrapeConfig, ViewParams};
use diagnostics::{DebugDir, DiagnosticSink, NoDiagnostics};
use ocr::TesseractCli;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "imagery-history",
    version,
    about = "Capture every historical imagery snapshot of a location from a 3-D imagery viewer"
)]
struct Cli {
    /// Enable debug logging (RUST_LOG still wins when set)
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Walk the historical time slider backwards and save one screenshot per date
    Historical(HistoricalArgs),
    /// Load a view once and OCR the "Data attribution" date from a screenshot
    #[command(name = "read-date")]
    ReadDate(ReadDateArgs),
    /// Print the capture file name for a view and a YYYY-MM-DD date
    #[command(name = "capture-name")]
    CaptureName(CaptureNameArgs),
    /// Decode the snapshot date embedded in a viewer URL
    #[command(name = "decode-url")]
    DecodeUrl(DecodeUrlArgs),
}

#[derive(Args, Debug, Clone)]
struct CameraArgs {
    /// Camera altitude (metres)
    #[arg(long, default_value_t = 70.0, allow_negative_numbers = true)]
    altitude: f64,
    /// Field-of-view distance component of the view URL
    #[arg(long, default_value_t = 25.0)]
    angle_of_view: f64,
    /// Heading (degrees)
    #[arg(long, default_value_t = 83.0, allow_negative_numbers = true)]
    direction: f64,
    /// Tilt (degrees)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    tilt: f64,
}

impl CameraArgs {
    fn view(&self, latitude: f64, longitude: f64) -> ViewParams {
        ViewParams {
            altitude: self.altitude,
            angle_of_view: self.angle_of_view,
            direction: self.direction,
            tilt: self.tilt,
            ..ViewParams::new(latitude, longitude)
        }
    }
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// JSON config file (unset fields keep their defaults)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds to let the page settle after loading
    #[arg(long)]
    delay: Option<f64>,
    /// Chrome/Chromium executable (default: searched on the system)
    #[arg(long)]
    browser: Option<PathBuf>,
    /// Attach to a running browser's DevTools endpoint instead of launching one
    #[arg(long)]
    devtools_url: Option<String>,
    /// Run the browser headless
    #[arg(long, action = ArgAction::SetTrue)]
    headless: bool,
    /// Fixed browser window size, e.g. 1280x1024 (default: maximized)
    #[arg(long, value_parser = parse_window_size)]
    window_size: Option<(u32, u32)>,
    /// Write processed crops and OCR overlays here
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

impl SessionArgs {
    fn load_config(&self) -> Result<ScrapeConfig> {
        let mut config = ScrapeConfig::load(self.config.as_deref())?;
        if let Some(delay) = self.delay {
            if !delay.is_finite() || delay < 0.0 {
                bail!("--delay must be a non-negative number of seconds");
            }
            config.initial_settle_ms = (delay * 1000.0).round() as u64;
        }
        if let Some(path) = self.browser.clone() {
            config.browser_binary = Some(path);
        }
        if let Some(url) = self.devtools_url.clone() {
            config.devtools_url = Some(url);
        }
        if self.headless {
            config.headless = true;
        }
        if let Some(size) = self.window_size {
            config.window_size = Some(size);
        }
        if let Some(dir) = self.debug_dir.clone() {
            config.debug_dir = Some(dir);
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct HistoricalArgs {
    /// Latitude of the location
    #[arg(long, allow_negative_numbers = true)]
    latitude: f64,
    /// Longitude of the location
    #[arg(long, allow_negative_numbers = true)]
    longitude: f64,
    #[command(flatten)]
    camera: CameraArgs,
    #[command(flatten)]
    session: SessionArgs,
    /// Stop once the snapshot date is on or before January 1 of this year
    #[arg(long)]
    cutoff_year: Option<i32>,
    /// Folder for the saved captures
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Re-read a repeated date this many times before treating it as final
    #[arg(long)]
    confirm_rereads: Option<u32>,
}

#[derive(Args, Debug)]
struct ReadDateArgs {
    /// Latitude of the location
    #[arg(allow_negative_numbers = true)]
    latitude: f64,
    /// Longitude of the location
    #[arg(allow_negative_numbers = true)]
    longitude: f64,
    #[command(flatten)]
    camera: CameraArgs,
    #[command(flatten)]
    session: SessionArgs,
    /// Where to keep the page screenshot
    #[arg(long, default_value = "page_screenshot.png")]
    screenshot: PathBuf,
}

#[derive(Args, Debug)]
struct CaptureNameArgs {
    #[arg(long, allow_negative_numbers = true)]
    latitude: f64,
    #[arg(long, allow_negative_numbers = true)]
    longitude: f64,
    /// Snapshot date, YYYY-MM-DD
    #[arg(long)]
    date: String,
    #[command(flatten)]
    camera: CameraArgs,
    /// Folder prefix for the printed path
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecodeUrlArgs {
    /// Viewer URL containing a `data=` parameter
    url: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Historical(args) => command_historical(args),
        Commands::ReadDate(args) => command_read_date(args),
        Commands::CaptureName(args) => command_capture_name(args),
        Commands::DecodeUrl(args) => command_decode_url(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "historical",
            "description": "Step back through historical imagery and save a labeled screenshot per date.",
            "browser": true
        }),
        json!({
            "name": "read-date",
            "description": "Read the data attribution date of the current imagery via OCR.",
            "browser": true
        }),
        json!({
            "name": "capture-name",
            "description": "Print the deterministic capture file name for a view and date.",
            "browser": false
        }),
        json!({
            "name": "decode-url",
            "description": "Decode the snapshot date embedded in a viewer URL.",
            "browser": false
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn tesseract_for(config: &ScrapeConfig) -> TesseractCli {
    TesseractCli {
        language: config.ocr_language.clone(),
        psm: config.ocr_psm,
        timeout: config.ocr_timeout(),
        ..TesseractCli::new(&config.tesseract_path)
    }
}

fn command_historical(args: HistoricalArgs) -> Result<()> {
    let mut config = args.session.load_config()?;
    if let Some(year) = args.cutoff_year {
        config.cutoff_year = year;
    }
    if let Some(dir) = args.out_dir {
        config.output_dir = dir;
    }
    if let Some(n) = args.confirm_rereads {
        config.confirm_rereads = n;
    }
    let view = args.camera.view(args.latitude, args.longitude);

    let ocr = tesseract_for(&config);
    let sink: Box<dyn DiagnosticSink> = match config.debug_dir.clone() {
        Some(dir) => Box::new(DebugDir::new(dir)),
        None => Box::new(NoDiagnostics),
    };

    let mut driver = ChromeSession::launch(&config)?;
    let report = scrape::run_historical(&mut driver, &ocr, sink.as_ref(), &config, &view)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn command_read_date(args: ReadDateArgs) -> Result<()> {
    let config = args.session.load_config()?;
    let view = args.camera.view(args.latitude, args.longitude);
    let ocr = tesseract_for(&config);

    let mut driver = ChromeSession::launch(&config)?;
    let date =
        attribution::read_attribution_date(&mut driver, &ocr, &config, &view, &args.screenshot)?;
    println!(
        "{}",
        serde_json::to_string(&json!({
            "latitude": view.latitude,
            "longitude": view.longitude,
            "date": date,
            "screenshot": args.screenshot.display().to_string(),
        }))?
    );
    Ok(())
}

fn command_capture_name(args: CaptureNameArgs) -> Result<()> {
    let view = args.camera.view(args.latitude, args.longitude);
    let folder = args.out_dir.unwrap_or_default();
    let path = capture_name::capture_path(&folder, &view, &args.date)?;
    println!("{}", path.display());
    Ok(())
}

fn command_decode_url(args: DecodeUrlArgs) -> Result<()> {
    let date = url_date::extract_date(&args.url);
    println!(
        "{}",
        serde_json::to_string(&json!({
            "date": date.map(|d| d.format("%Y-%m-%d").to_string()),
        }))?
    );
    Ok(())
}

fn parse_window_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid dimension {v:?} in {raw:?}"))
    };
    Ok((parse(w)?, parse(h)?))
}
