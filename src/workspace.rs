//! Per-session output directory
//!
//! Owns `capture_log.txt`, the numbered stage screenshots and the
//! diagnostics dumped when a session dies.

use crate::browser::PageDriver;
use crate::error::{CaptureError, Result};
use crate::session::CaptureSession;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOG_FILE_NAME: &str = "capture_log.txt";
pub const ERROR_SCREENSHOT_NAME: &str = "error_state.png";
pub const ERROR_PAGE_NAME: &str = "error_page.html";

pub struct OutputWorkspace {
    dir: PathBuf,
    log_file: File,
    stage: usize,
}

impl OutputWorkspace {
    /// Create `{output_root}/{session directory}` and open its log.
    ///
    /// An existing directory is never reused: a session started in the same
    /// second under the same label gets a `_2`, `_3`, ... suffix instead.
    pub fn create(output_root: &Path, session: &CaptureSession) -> Result<Self> {
        let dir_err = |dir: &Path, e: std::io::Error| {
            CaptureError::Other(format!(
                "Failed to create output directory {}: {}",
                dir.display(),
                e
            ))
        };
        std::fs::create_dir_all(output_root).map_err(|e| dir_err(output_root, e))?;

        let base = session.directory_name();
        let mut attempt = 1;
        let dir = loop {
            let name = if attempt == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let dir = output_root.join(name);
            match std::fs::create_dir(&dir) {
                Ok(()) => break dir,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(dir_err(&dir, e)),
            }
        };

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))?;

        let mut workspace = Self {
            dir,
            log_file,
            stage: 0,
        };
        workspace.info(&format!(
            "Session started for {} ({})",
            session.location_label, session.coordinates
        ));
        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn append(&mut self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
        let line = format!(
            "[{}] {} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        // Console logging above still carries the line if the file write fails
        if let Err(e) = self.log_file.write_all(line.as_bytes()) {
            log::debug!("Could not append to {}: {}", LOG_FILE_NAME, e);
        }
    }

    pub fn info(&mut self, message: &str) {
        self.append(log::Level::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.append(log::Level::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.append(log::Level::Error, message);
    }

    /// Write `NN_<stage>.png`, numbering stages in the order they are saved.
    pub async fn save_stage(&mut self, stage: &str, png: &[u8]) -> Result<PathBuf> {
        self.stage += 1;
        let path = self.path(&format!("{:02}_{}.png", self.stage, stage));
        tokio::fs::write(&path, png).await?;
        self.info(&format!("Saved {}", path.display()));
        Ok(path)
    }

    /// Screenshot the page and save it as the next stage. Failures are logged
    /// and otherwise ignored.
    pub async fn capture_stage<P: PageDriver>(&mut self, page: &P, stage: &str) -> Option<PathBuf> {
        match page.screenshot(None).await {
            Ok(png) => match self.save_stage(stage, &png).await {
                Ok(path) => Some(path),
                Err(e) => {
                    self.warn(&format!("Could not save stage '{}': {}", stage, e));
                    None
                }
            },
            Err(e) => {
                self.warn(&format!("Could not screenshot stage '{}': {}", stage, e));
                None
            }
        }
    }

    /// Best-effort dump of the page state after an unrecovered error.
    pub async fn dump_diagnostics<P: PageDriver>(&mut self, page: &P) {
        match page.screenshot(None).await {
            Ok(png) => {
                if let Err(e) = tokio::fs::write(self.path(ERROR_SCREENSHOT_NAME), png).await {
                    self.warn(&format!("Could not write error screenshot: {}", e));
                }
            }
            Err(e) => self.warn(&format!("Could not take error screenshot: {}", e)),
        }

        match page.page_source().await {
            Ok(html) => {
                if let Err(e) = tokio::fs::write(self.path(ERROR_PAGE_NAME), html).await {
                    self.warn(&format!("Could not write page source: {}", e));
                }
            }
            Err(e) => self.warn(&format!("Could not read page source: {}", e)),
        }
    }
}
