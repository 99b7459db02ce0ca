//! Text recognition for the on-screen date label
//!
//! The default engine shells out to the `tesseract` binary, feeding the PNG
//! crop on stdin and reading the recognized text from stdout.

use crate::config::OcrConfig;
use crate::error::{CaptureError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Characters that can appear in a Google Earth imagery date label.
pub const DATE_LABEL_WHITELIST: &str =
    "0123456789/, ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[allow(async_fn_in_trait)]
pub trait OcrEngine {
    async fn recognize_text(&self, image: &[u8], whitelist: Option<&str>) -> Result<String>;
}

/// OCR through the tesseract command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    page_seg_mode: u8,
}

impl TesseractCli {
    pub fn new(binary: impl Into<String>, page_seg_mode: u8) -> Self {
        Self {
            binary: binary.into(),
            page_seg_mode,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.binary.clone(), config.page_seg_mode)
    }

    fn args(&self, whitelist: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.page_seg_mode.to_string(),
        ];
        if let Some(chars) = whitelist {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", chars));
        }
        args
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        // PSM 7: treat the image as a single text line
        Self::new("tesseract", 7)
    }
}

impl OcrEngine for TesseractCli {
    async fn recognize_text(&self, image: &[u8], whitelist: Option<&str>) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(self.args(whitelist))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Ocr(format!("Failed to start {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image)
                .await
                .map_err(|e| CaptureError::Ocr(format!("Failed to feed image: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CaptureError::Ocr(format!("tesseract did not finish: {}", e)))?;

        if !output.status.success() {
            return Err(CaptureError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// OCR turned off; every label falls back to the positional estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    async fn recognize_text(&self, _image: &[u8], _whitelist: Option<&str>) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_with_whitelist() {
        let engine = TesseractCli::default();
        let args = engine.args(Some("0123456789/"));
        assert_eq!(&args[..4], &["stdin", "stdout", "--psm", "7"]);
        assert_eq!(args[5], "tessedit_char_whitelist=0123456789/");
    }

    #[test]
    fn test_args_without_whitelist() {
        let engine = TesseractCli::new("/opt/tesseract", 6);
        assert_eq!(engine.args(None), vec!["stdin", "stdout", "--psm", "6"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_ocr_error() {
        let engine = TesseractCli::new("definitely-not-a-tesseract-binary", 7);
        let err = engine.recognize_text(b"png", None).await.unwrap_err();
        assert!(matches!(err, CaptureError::Ocr(_)));
    }
}
