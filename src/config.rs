//! Capture configuration
//!
//! Everything that depends on the Google Earth UI layout (pixel ranges,
//! calibration, locators, crop offsets) lives here so it can be retuned in a
//! JSON file when the interface moves.

use crate::browser::{Region, UiLocator};
use crate::date::Calibration;
use crate::detect::{ByteSizeDetector, Detector, PerceptualHashDetector};
use crate::error::{CaptureError, Result};
use crate::ocr::DATE_LABEL_WHITELIST;
use crate::scanner::ScanRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_NAME: &str = "earth-history-capture";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub chrome_path: Option<String>,
    pub no_sandbox: bool,
    /// Connect to an already running Chrome instead of launching one
    pub debug_port: Option<u16>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            no_sandbox: false,
            debug_port: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Camera placement encoded into the Earth URL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub altitude_m: f64,
    pub distance_m: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            altitude_m: 100.0,
            distance_m: 1500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorSettings {
    ByteSize { threshold_percent: f64 },
    PerceptualHash { max_distance: u32 },
}

impl Default for DetectorSettings {
    fn default() -> Self {
        DetectorSettings::ByteSize {
            threshold_percent: 0.8,
        }
    }
}

impl DetectorSettings {
    pub fn build(&self) -> Detector {
        match *self {
            DetectorSettings::ByteSize { threshold_percent } => {
                Detector::ByteSize(ByteSizeDetector::new(threshold_percent))
            }
            DetectorSettings::PerceptualHash { max_distance } => {
                Detector::PerceptualHash(PerceptualHashDetector::new(max_distance))
            }
        }
    }
}

/// Date label crop, relative to the probed slider position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateCrop {
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for DateCrop {
    fn default() -> Self {
        Self {
            offset_x: -100.0,
            offset_y: -60.0,
            width: 200.0,
            height: 40.0,
        }
    }
}

impl DateCrop {
    pub fn region_at(&self, x: f64, y: f64) -> Region {
        Region::new(
            (x + self.offset_x).max(0.0),
            (y + self.offset_y).max(0.0),
            self.width,
            self.height,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Control that switches historical imagery on
    pub history_toggle: UiLocator,
    /// Present only once historical imagery is on
    pub timeline: UiLocator,
    /// Keys pressed after load to close splash screens and tooltips
    pub dismiss_keys: Vec<String>,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            history_toggle: UiLocator::TextSearch {
                pattern: "historical imagery".to_string(),
            },
            timeline: UiLocator::SelectorSearch {
                selector: "[role=slider]".to_string(),
            },
            dismiss_keys: vec!["Escape".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub page_load_ms: u64,
    /// Upper bound handed to `await_stable` after the initial load
    pub initial_settle_ms: u64,
    /// Upper bound handed to `await_stable` after each timeline click
    pub after_click_ms: u64,
    /// Fixed delay once the document reports ready
    pub settle_ms: u64,
    pub mode_activation_retries: u32,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            page_load_ms: 30_000,
            initial_settle_ms: 15_000,
            after_click_ms: 4_000,
            settle_ms: 2_500,
            mode_activation_retries: 3,
        }
    }
}

impl WaitSettings {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn initial_settle(&self) -> Duration {
        Duration::from_millis(self.initial_settle_ms)
    }

    pub fn after_click(&self) -> Duration {
        Duration::from_millis(self.after_click_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub binary: String,
    pub page_seg_mode: u8,
    pub whitelist: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "tesseract".to_string(),
            page_seg_mode: 7,
            whitelist: Some(DATE_LABEL_WHITELIST.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub output_root: PathBuf,
    pub browser: BrowserSettings,
    pub camera: CameraSettings,
    pub scan: ScanRange,
    pub calibration: Calibration,
    pub detector: DetectorSettings,
    pub date_crop: DateCrop,
    pub ui: UiSettings,
    pub waits: WaitSettings,
    pub ocr: OcrConfig,
    pub create_archive: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./captures"),
            browser: BrowserSettings::default(),
            camera: CameraSettings::default(),
            scan: ScanRange::default(),
            calibration: Calibration::default(),
            detector: DetectorSettings::default(),
            date_crop: DateCrop::default(),
            ui: UiSettings::default(),
            waits: WaitSettings::default(),
            ocr: OcrConfig::default(),
            create_archive: true,
        }
    }
}

impl CaptureConfig {
    /// `<config dir>/earth-history-capture/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: CaptureConfig = serde_json::from_str(&content).map_err(|e| {
            CaptureError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => {
                log::info!("Loading configuration from {}", default.display());
                Self::from_file(&default)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.num_points == 0 {
            return Err(CaptureError::Config("scan.num_points must be at least 1".into()));
        }
        if self.scan.end_x <= self.scan.start_x {
            return Err(CaptureError::Config(format!(
                "scan.end_x ({}) must be greater than scan.start_x ({})",
                self.scan.end_x, self.scan.start_x
            )));
        }
        if self.calibration.is_degenerate() {
            return Err(CaptureError::Config(
                "calibration needs distinct pixel bounds and distinct years".into(),
            ));
        }
        if self.calibration.end_x <= self.calibration.start_x
            || self.calibration.end_year <= self.calibration.start_year
        {
            return Err(CaptureError::Config(format!(
                "calibration must increase left to right (x {}..{}, years {}..{})",
                self.calibration.start_x,
                self.calibration.end_x,
                self.calibration.start_year,
                self.calibration.end_year
            )));
        }
        match self.detector {
            DetectorSettings::ByteSize { threshold_percent } if threshold_percent < 0.0 => {
                return Err(CaptureError::Config(
                    "detector.threshold_percent cannot be negative".into(),
                ));
            }
            _ => {}
        }
        if self.date_crop.width <= 0.0 || self.date_crop.height <= 0.0 {
            return Err(CaptureError::Config("date_crop must have a positive size".into()));
        }
        Ok(())
    }
}
