pub mod browser;
pub mod capture;
pub mod config;
pub mod date;
pub mod detect;
pub mod earth;
pub mod error;
pub mod ocr;
pub mod report;
pub mod scanner;
pub mod session;
pub mod workspace;

//  Re-export commonly used items
pub use browser::{ChromeDriver, ConnectionMode, PageDriver, Region, UiLocator};
pub use capture::{run_capture, run_capture_with, CaptureRequest};
pub use config::CaptureConfig;
pub use date::{Calibration, DateResolution, DateResolver, DateSource};
pub use detect::{ByteSizeDetector, ChangeDetector, Detector, PerceptualHashDetector, RollingBaseline};
pub use error::{CaptureError, Result};
pub use ocr::{NoOcr, OcrEngine, TesseractCli};
pub use report::{SessionMetadata, SessionReport};
pub use scanner::{Probe, ProbeCapture, ScanRange, ScanSummary, TimelineScanner};
pub use session::{CaptureSession, Coordinates, ProbeFailure, Sample, SessionState};
pub use workspace::OutputWorkspace;
