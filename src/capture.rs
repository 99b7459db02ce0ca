//! End-to-end capture of one location.

use crate::browser::{ChromeDriver, PageDriver};
use crate::config::CaptureConfig;
use crate::date::DateResolver;
use crate::earth::{activate_history_mode, dismiss_overlays, earth_url, TimelineProbe};
use crate::error::{CaptureError, Result};
use crate::ocr::{NoOcr, OcrEngine, TesseractCli};
use crate::report::{create_archive, SessionReport};
use crate::scanner::{ScanSummary, TimelineScanner};
use crate::session::{CaptureSession, Coordinates, SessionState};
use crate::workspace::OutputWorkspace;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// `"lat,lon"`
    pub location: String,
    /// Human label used for file names; defaults to the location text
    pub label: Option<String>,
    pub start_year: i32,
    pub headless: bool,
}

impl CaptureRequest {
    pub fn new(location: impl Into<String>, start_year: i32, headless: bool) -> Self {
        Self {
            location: location.into(),
            label: None,
            start_year,
            headless,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn coordinates(&self) -> Result<Coordinates> {
        self.location.parse()
    }

    /// Create the session and its output directory.
    pub fn open_session(&self, config: &CaptureConfig) -> Result<(CaptureSession, OutputWorkspace)> {
        let coordinates = self.coordinates()?;
        let label = self
            .label
            .clone()
            .unwrap_or_else(|| self.location.trim().to_string());
        let session = CaptureSession::new(label, coordinates, self.start_year);
        let workspace = OutputWorkspace::create(&config.output_root, &session)?;
        Ok((session, workspace))
    }
}

/// Capture `location` with the configuration found on disk (or defaults).
pub async fn run_capture(location: &str, start_year: i32, headless: bool) -> Result<PathBuf> {
    let config = CaptureConfig::load(None)?;
    run_capture_with(CaptureRequest::new(location, start_year, headless), &config).await
}

/// Launch Chrome, capture, close Chrome.
///
/// Returns the archive path when one was created, otherwise the session
/// directory.
pub async fn run_capture_with(request: CaptureRequest, config: &CaptureConfig) -> Result<PathBuf> {
    config.validate()?;
    let (mut session, mut workspace) = request.open_session(config)?;

    let driver = match launch_browser(config, request.headless).await {
        Ok(driver) => driver
            .with_settle_delay(config.waits.settle())
            .with_load_timeout(config.waits.page_load()),
        Err(e) => {
            workspace.error(&format!("Browser launch failed: {}", e));
            session.mark_failed(e.to_string());
            session.finish();
            return Err(e);
        }
    };

    let result = run_session(&driver, &mut session, &mut workspace, config).await;

    if result.is_err() && !driver.is_alive().await {
        workspace.warn("Browser is no longer responding");
    }
    if let Err(e) = driver.close().await {
        workspace.warn(&format!("Failed to close browser cleanly: {}", e));
    }
    result
}

async fn launch_browser(config: &CaptureConfig, headless: bool) -> Result<ChromeDriver> {
    match config.browser.debug_port {
        Some(port) => {
            log::info!("Connecting to Chrome on debug port {}", port);
            ChromeDriver::connect_debug_port(port).await
        }
        None => {
            ChromeDriver::launch_auto(
                config.browser.chrome_path.clone(),
                config.browser.no_sandbox,
                headless,
                (config.browser.window_width, config.browser.window_height),
            )
            .await
        }
    }
}

/// Drive an already open page through the whole pipeline.
///
/// On failure the page state is dumped into the workspace, a partial report
/// is written if anything was sampled, and the error is returned. Closing
/// the browser is left to the caller.
pub async fn run_session<P: PageDriver>(
    page: &P,
    session: &mut CaptureSession,
    workspace: &mut OutputWorkspace,
    config: &CaptureConfig,
) -> Result<PathBuf> {
    let outcome = if config.ocr.enabled {
        let resolver = DateResolver::new(config.calibration, TesseractCli::from_config(&config.ocr))
            .with_whitelist(config.ocr.whitelist.clone());
        drive(page, session, workspace, config, &resolver).await
    } else {
        let resolver = DateResolver::new(config.calibration, NoOcr);
        drive(page, session, workspace, config, &resolver).await
    };

    let outcome = match outcome {
        Ok(summary) => {
            session.finish();
            workspace.info(&format!(
                "Scan finished: {} probed, {} unique, {} failed",
                summary.probed, summary.unique, summary.failed
            ));
            finalize(session, workspace, config).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(output) => Ok(output),
        Err(e) => {
            workspace.error(&format!("Capture failed: {}", e));
            workspace.dump_diagnostics(page).await;
            if !matches!(session.state, SessionState::Failed { .. }) {
                session.mark_failed(e.to_string());
            }
            session.finish();

            if !session.samples.is_empty() {
                let report = SessionReport::new(session, &config.scan);
                match report.write(workspace.dir()).await {
                    Ok(_) => workspace.info(&format!(
                        "Partial report written with {} unique frames",
                        report.metadata().captured_images
                    )),
                    Err(report_err) => {
                        workspace.warn(&format!("Partial report failed: {}", report_err))
                    }
                }
            }
            Err(e)
        }
    }
}

async fn drive<P: PageDriver, O: OcrEngine>(
    page: &P,
    session: &mut CaptureSession,
    workspace: &mut OutputWorkspace,
    config: &CaptureConfig,
    resolver: &DateResolver<O>,
) -> Result<ScanSummary> {
    let url = earth_url(&session.coordinates, &config.camera);
    workspace.info(&format!("Navigating to {}", url));
    page.navigate(&url).await?;
    page.await_stable(config.waits.initial_settle()).await?;
    workspace.capture_stage(page, "loaded").await;

    dismiss_overlays(page, &config.ui.dismiss_keys).await?;

    let detector = config.detector.build();
    activate_history_mode(page, &config.ui, &detector, &config.waits).await?;
    workspace.info("Historical imagery mode active");
    workspace.capture_stage(page, "history_mode").await;

    let baseline = page.screenshot(None).await?;
    let scanner = TimelineScanner::new(config.scan, detector);
    let mut probe = TimelineProbe::new(
        page,
        config.scan.timeline_y,
        config.date_crop,
        config.waits.after_click(),
    );
    let summary = scanner.scan(baseline, &mut probe, resolver, session).await?;
    workspace.capture_stage(page, "scan_complete").await;

    for failure in &session.failures {
        workspace.warn(&format!(
            "Position {} (x={:.0}) skipped: {}",
            failure.sequence_index, failure.pixel_x, failure.error
        ));
    }

    Ok(summary)
}

async fn finalize(
    session: &CaptureSession,
    workspace: &mut OutputWorkspace,
    config: &CaptureConfig,
) -> Result<PathBuf> {
    let report = SessionReport::new(session, &config.scan);
    let artifacts = report.write(workspace.dir()).await?;
    workspace.info(&format!(
        "Saved {} unique frames ({}), report at {}",
        report.metadata().captured_images,
        report.metadata().actual_year_range,
        artifacts.html.display()
    ));

    if !config.create_archive {
        return Ok(workspace.dir().to_path_buf());
    }

    let dir = workspace.dir().to_path_buf();
    let dest = archive_path(&dir);
    let archive = {
        let dest = dest.clone();
        tokio::task::spawn_blocking(move || create_archive(&dir, &dest))
            .await
            .map_err(|e| CaptureError::Archive(e.to_string()))
            .and_then(|r| r)
    };

    match archive {
        Ok(path) => {
            workspace.info(&format!("Archive created at {}", path.display()));
            Ok(path)
        }
        Err(e) => {
            // The session directory is still complete
            workspace.warn(&format!("Archive creation failed: {}", e));
            Ok(workspace.dir().to_path_buf())
        }
    }
}

/// `<parent>/<session directory name>.zip`
pub fn archive_path(session_dir: &Path) -> PathBuf {
    let name = session_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "capture".to_string());
    session_dir.with_file_name(format!("{}.zip", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_path_is_sibling() {
        let dir = Path::new("/tmp/captures/accra_20240101_120000");
        assert_eq!(
            archive_path(dir),
            PathBuf::from("/tmp/captures/accra_20240101_120000.zip")
        );
    }

    #[test]
    fn test_request_label_defaults_to_location() {
        let config = CaptureConfig {
            output_root: std::env::temp_dir().join("earth-history-request-test"),
            ..Default::default()
        };
        let (session, workspace) = CaptureRequest::new(" 5.5555,-0.2616 ", 2019, true)
            .open_session(&config)
            .unwrap();
        assert_eq!(session.location_label, "5.5555,-0.2616");
        assert!(workspace.dir().starts_with(&config.output_root));

        let (session, _) = CaptureRequest::new("1,2", 2019, true)
            .with_label("Accra")
            .open_session(&config)
            .unwrap();
        assert_eq!(session.file_stem(), "accra");
        std::fs::remove_dir_all(&config.output_root).ok();
    }

    #[test]
    fn test_invalid_location_is_rejected() {
        let err = CaptureRequest::new("Accra", 2019, true)
            .coordinates()
            .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidLocation(_)));
    }
}
