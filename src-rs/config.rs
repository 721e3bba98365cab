use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_VIEWER_URL: &str = "https://earth.google.com/web";

/// Camera parameters of one scrape. Together with the snapshot date they
/// fully determine a capture's file name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub angle_of_view: f64,
    pub direction: f64,
    pub tilt: f64,
}

impl ViewParams {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 70.0,
            angle_of_view: 25.0,
            direction: 83.0,
            tilt: 0.0,
        }
    }

    pub fn view_url(&self, base: &str) -> String {
        format!(
            "{}/@{},{},{}a,{}d,{}y,{}t",
            base.trim_end_matches('/'),
            self.latitude,
            self.longitude,
            self.altitude,
            self.angle_of_view,
            self.direction,
            self.tilt
        )
    }
}

/// Fraction of the screenshot searched for the anchor label and arrows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 0.25,
        }
    }
}

impl RegionOfInterest {
    /// Pixel box `(x, y, w, h)` clamped to the image bounds.
    pub fn pixel_box(&self, img_w: u32, img_h: u32) -> (u32, u32, u32, u32) {
        let frac = |v: f64| v.clamp(0.0, 1.0);
        let x = (f64::from(img_w) * frac(self.x)) as u32;
        let y = (f64::from(img_h) * frac(self.y)) as u32;
        let w = (f64::from(img_w) * frac(self.width)) as u32;
        let h = (f64::from(img_h) * frac(self.height)) as u32;
        (
            x.min(img_w),
            y.min(img_h),
            w.min(img_w.saturating_sub(x)),
            h.min(img_h.saturating_sub(y)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Command,
    Control,
}

impl Default for Modifier {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Modifier::Command
        } else {
            Modifier::Control
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Chrome/Chromium executable; `None` lets the driver search the usual places.
    pub browser_binary: Option<PathBuf>,
    /// Attach to an already running browser (`ws://` or `http://host:port`)
    /// instead of launching one.
    pub devtools_url: Option<String>,
    pub headless: bool,
    /// `None` starts maximized.
    pub window_size: Option<(u32, u32)>,
    pub viewer_url: String,
    pub initial_settle_ms: u64,
    pub stabilize_interval_ms: u64,
    pub step_interval_ms: u64,
    /// Poll interval of the single-shot attribution read.
    pub attribution_interval_ms: u64,
    pub stabilize_attempts: u32,
    pub cutoff_year: i32,
    pub output_dir: PathBuf,
    pub temp_screenshot: Option<PathBuf>,
    pub region_of_interest: RegionOfInterest,
    pub contrast_factor: f32,
    pub binarize_threshold: u8,
    pub align_tolerance: f64,
    pub anchor_label: String,
    pub dismiss_label: String,
    pub historical_shortcut: char,
    pub shortcut_modifier: Modifier,
    pub tesseract_path: PathBuf,
    pub ocr_language: Option<String>,
    pub ocr_psm: Option<u32>,
    pub ocr_timeout_secs: u64,
    pub debug_dir: Option<PathBuf>,
    pub confirm_rereads: u32,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            browser_binary: None,
            devtools_url: None,
            headless: false,
            window_size: None,
            viewer_url: DEFAULT_VIEWER_URL.to_string(),
            initial_settle_ms: 1000,
            stabilize_interval_ms: 500,
            step_interval_ms: 100,
            attribution_interval_ms: 1000,
            stabilize_attempts: 20,
            cutoff_year: 2000,
            output_dir: PathBuf::from("saving_screenshots"),
            temp_screenshot: None,
            region_of_interest: RegionOfInterest::default(),
            contrast_factor: 2.5,
            binarize_threshold: 128,
            align_tolerance: 10.0,
            anchor_label: "Imagery".to_string(),
            dismiss_label: "Dismiss".to_string(),
            historical_shortcut: 'h',
            shortcut_modifier: Modifier::default(),
            tesseract_path: PathBuf::from("tesseract"),
            ocr_language: None,
            ocr_psm: None,
            ocr_timeout_secs: 60,
            debug_dir: None,
            confirm_rereads: 0,
        }
    }
}

impl ScrapeConfig {
    /// Defaults, then an optional JSON file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("config not found: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config JSON: {}", path.display()))?
            }
            None => ScrapeConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let path = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        };
        if let Some(dir) = path("IHC_OUT_DIR") {
            self.output_dir = dir;
        }
        if let Some(bin) = path("IHC_BROWSER") {
            self.browser_binary = Some(bin);
        }
        if let Some(bin) = path("IHC_TESSERACT") {
            self.tesseract_path = bin;
        }
    }

    pub fn initial_settle(&self) -> Duration {
        Duration::from_millis(self.initial_settle_ms)
    }

    pub fn stabilize_interval(&self) -> Duration {
        Duration::from_millis(self.stabilize_interval_ms)
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn attribution_interval(&self) -> Duration {
        Duration::from_millis(self.attribution_interval_ms)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs.max(1))
    }

    /// Where the control-detection screenshot goes; unique per process unless configured.
    pub fn temp_screenshot_path(&self) -> PathBuf {
        use rand::Rng;
        self.temp_screenshot.clone().unwrap_or_else(|| {
            let rand = rand::thread_rng().gen_range(1000..9999);
            env::temp_dir().join(format!(
                "imagery-history-{}-{rand}.png",
                std::process::id()
            ))
        })
    }
}
