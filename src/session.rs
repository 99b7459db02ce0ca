//! Capture session data model

use crate::date::{DateResolution, DateSource};
use crate::error::{CaptureError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(CaptureError::InvalidLocation(format!(
                "{},{}",
                latitude, longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl FromStr for Coordinates {
    type Err = CaptureError;

    /// Parses `"lat,lon"`, whitespace around either number allowed.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CaptureError::InvalidLocation(s.to_string());
        let (lat, lon) = s.split_once(',').ok_or_else(invalid)?;
        let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;
        Self::new(latitude, longitude).map_err(|_| invalid())
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Reduce a label to `[a-z0-9_]` for use in file names.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "location".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One probe at one timeline position.
#[derive(Debug, Clone)]
pub struct Sample {
    /// 1-based position in the scan
    pub sequence_index: usize,
    pub pixel_x: f64,
    pub estimated_year: i32,
    pub frame_bytes: Vec<u8>,
    pub date_region_bytes: Vec<u8>,
    pub date: DateResolution,
    pub is_unique_frame: bool,
}

impl Sample {
    /// The OCR-derived canonical date, if OCR produced one.
    pub fn resolved_date(&self) -> Option<&str> {
        match self.date.source {
            DateSource::Ocr => Some(&self.date.canonical),
            DateSource::Estimate => None,
        }
    }

    /// `YYYY-MM-DD` or `est_YYYY`
    pub fn date_key(&self) -> &str {
        &self.date.canonical
    }
}

/// A probe that errored and was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub sequence_index: usize,
    pub pixel_x: f64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Completed,
    Failed { reason: String },
}

/// One run over one location.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub location_label: String,
    pub coordinates: Coordinates,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `(start_year, current_year)`, inclusive
    pub target_year_range: (i32, i32),
    pub samples: Vec<Sample>,
    pub failures: Vec<ProbeFailure>,
    pub state: SessionState,
}

impl CaptureSession {
    pub fn new(location_label: impl Into<String>, coordinates: Coordinates, start_year: i32) -> Self {
        let started_at = Utc::now();
        Self {
            location_label: location_label.into(),
            coordinates,
            started_at,
            ended_at: None,
            target_year_range: (start_year, started_at.year()),
            samples: Vec::new(),
            failures: Vec::new(),
            state: SessionState::Running,
        }
    }

    pub fn file_stem(&self) -> String {
        sanitize_label(&self.location_label)
    }

    /// Directory name for this session's output: `{label}_{YYYYmmdd_HHMMSS}`
    pub fn directory_name(&self) -> String {
        format!(
            "{}_{}",
            self.file_stem(),
            self.started_at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn push_failure(&mut self, failure: ProbeFailure) {
        self.failures.push(failure);
    }

    pub fn unique_samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|s| s.is_unique_frame)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = SessionState::Failed {
            reason: reason.into(),
        };
    }

    /// Stamp the end time; a still-running session becomes `Completed`.
    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Completed;
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
