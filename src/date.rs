//! Date label resolution
//!
//! Two signals feed a sample's date: the timeline position, interpolated over
//! a calibrated pixel range, and OCR of the label Google Earth draws next to
//! the slider. An OCR date always wins; the positional estimate is only the
//! fallback.

use crate::ocr::{OcrEngine, DATE_LABEL_WHITELIST};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static OLDER_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)older\W*(\d{1,2})\s*/\s*(\d{1,2})\s*/\s*(\d{4})").expect("valid regex")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})\s*/\s*(\d{1,2})\s*/\s*(\d{4})").expect("valid regex")
});

static MONTH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s*(\d{4})",
    )
    .expect("valid regex")
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Maps timeline pixels to years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub start_x: f64,
    pub end_x: f64,
    pub start_year: i32,
    pub end_year: i32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            start_x: 400.0,
            end_x: 1600.0,
            start_year: 2002,
            end_year: 2024,
        }
    }
}

impl Calibration {
    pub fn is_degenerate(&self) -> bool {
        self.end_year == self.start_year || (self.end_x - self.start_x).abs() < f64::EPSILON
    }

    pub fn pixels_per_year(&self) -> f64 {
        (self.end_x - self.start_x) / f64::from(self.end_year - self.start_year)
    }

    /// Linear interpolation of `pixel_x` onto the calibrated year range.
    pub fn estimate_year(&self, pixel_x: f64) -> i32 {
        if self.is_degenerate() {
            return self.start_year;
        }
        // `as` saturates, so a tiny pixel span cannot overflow the add
        let offset = (pixel_x - self.start_x) / self.pixels_per_year();
        self.start_year.saturating_add(offset.round() as i32)
    }
}

/// Where a canonical date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    Ocr,
    Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateResolution {
    /// `YYYY-MM-DD` from OCR, or `est_YYYY`
    pub canonical: String,
    pub estimated_year: i32,
    /// Trimmed OCR output, kept even when no date could be parsed from it
    pub raw_ocr_text: Option<String>,
    pub source: DateSource,
}

/// Label used when OCR produced nothing usable.
pub fn estimate_key(year: i32) -> String {
    format!("est_{}", year)
}

/// Extract a date from OCR text.
///
/// Patterns are tried in order: `older MM/DD/YYYY`, bare `MM/DD/YYYY`, then
/// `Mon DD, YYYY`. Matches that are not real calendar dates are skipped.
pub fn parse_ocr_date(text: &str) -> Option<NaiveDate> {
    for pattern in [&*OLDER_NUMERIC, &*NUMERIC] {
        for caps in pattern.captures_iter(text) {
            let month = caps[1].parse::<u32>().ok();
            let day = caps[2].parse::<u32>().ok();
            let year = caps[3].parse::<i32>().ok();
            if let (Some(m), Some(d), Some(y)) = (month, day, year) {
                if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                    return Some(date);
                }
            }
        }
    }

    for caps in MONTH_NAME.captures_iter(text) {
        let abbrev = caps[1].to_ascii_lowercase();
        let Some(month) = MONTHS.iter().position(|m| *m == abbrev) else {
            continue;
        };
        let day = caps[2].parse::<u32>().ok();
        let year = caps[3].parse::<i32>().ok();
        if let (Some(d), Some(y)) = (day, year) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, month as u32 + 1, d) {
                return Some(date);
            }
        }
    }

    None
}

/// Canonical `YYYY-MM-DD` key for OCR text, if it holds a date.
pub fn canonicalize(text: &str) -> Option<String> {
    parse_ocr_date(text).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Combines OCR and the positional estimate.
pub struct DateResolver<O> {
    calibration: Calibration,
    ocr: O,
    whitelist: Option<String>,
}

impl<O: OcrEngine> DateResolver<O> {
    pub fn new(calibration: Calibration, ocr: O) -> Self {
        Self {
            calibration,
            ocr,
            whitelist: Some(DATE_LABEL_WHITELIST.to_string()),
        }
    }

    pub fn with_whitelist(mut self, whitelist: Option<String>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Resolve the best available date for a probe. Never fails.
    pub async fn resolve(&self, pixel_x: f64, date_region: &[u8]) -> DateResolution {
        let estimated_year = self.calibration.estimate_year(pixel_x);

        let raw_ocr_text = if date_region.is_empty() {
            None
        } else {
            match self
                .ocr
                .recognize_text(date_region, self.whitelist.as_deref())
                .await
            {
                Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
                Err(e) => {
                    log::debug!("OCR failed at x={:.0}: {}", pixel_x, e);
                    None
                }
            }
        };

        match raw_ocr_text.as_deref().and_then(canonicalize) {
            Some(canonical) => DateResolution {
                canonical,
                estimated_year,
                raw_ocr_text,
                source: DateSource::Ocr,
            },
            None => DateResolution {
                canonical: estimate_key(estimated_year),
                estimated_year,
                raw_ocr_text,
                source: DateSource::Estimate,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, Result};

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        async fn recognize_text(&self, _image: &[u8], _whitelist: Option<&str>) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenOcr;

    impl OcrEngine for BrokenOcr {
        async fn recognize_text(&self, _image: &[u8], _whitelist: Option<&str>) -> Result<String> {
            Err(CaptureError::Ocr("engine crashed".into()))
        }
    }

    #[test]
    fn test_calibration_endpoints() {
        let cal = Calibration::default();
        assert_eq!(cal.estimate_year(400.0), 2002);
        assert_eq!(cal.estimate_year(1600.0), 2024);
        assert_eq!(cal.estimate_year(1000.0), 2013);
    }

    #[test]
    fn test_calibration_is_monotonic() {
        let cal = Calibration::default();
        let mut previous = i32::MIN;
        for x in (0..2000).step_by(7) {
            let year = cal.estimate_year(x as f64);
            assert!(year >= previous, "year decreased at x={}", x);
            previous = year;
        }
    }

    #[test]
    fn test_degenerate_calibration() {
        let cal = Calibration {
            end_year: 2002,
            ..Calibration::default()
        };
        assert!(cal.is_degenerate());
        assert_eq!(cal.estimate_year(1234.0), 2002);
    }

    #[test]
    fn test_tiny_pixel_span_saturates() {
        let calibration = Calibration {
            start_x: 400.0,
            end_x: 400.000001,
            start_year: 2002,
            end_year: 2024,
        };
        assert!(!calibration.is_degenerate());
        assert_eq!(calibration.estimate_year(1600.0), i32::MAX);
        assert_eq!(calibration.estimate_year(-1600.0), i32::MIN + 2002);
    }

    #[test]
    fn test_canonical_formats() {
        assert_eq!(canonicalize("3/20/2016").as_deref(), Some("2016-03-20"));
        assert_eq!(canonicalize("Jan 19, 2024").as_deref(), Some("2024-01-19"));
        assert_eq!(canonicalize("Imagery older 12/1/2009").as_deref(), Some("2009-12-01"));
        assert_eq!(canonicalize("September 5 2011").as_deref(), Some("2011-09-05"));
        assert_eq!(canonicalize("Google Earth"), None);
        assert_eq!(canonicalize("13/45/2016"), None);
    }

    #[test]
    fn test_older_pattern_preferred_over_first_bare_date() {
        // "older" prefixed date wins even when a bare date appears first
        let date = parse_ocr_date("4/2/2010 older 7/8/2006").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2006, 7, 8).unwrap());
    }

    #[tokio::test]
    async fn test_ocr_wins_over_estimate() {
        let resolver = DateResolver::new(Calibration::default(), FixedOcr("3/20/2016"));
        let resolution = resolver.resolve(400.0, b"crop").await;
        assert_eq!(resolution.canonical, "2016-03-20");
        assert_eq!(resolution.estimated_year, 2002);
        assert_eq!(resolution.source, DateSource::Ocr);
    }

    #[tokio::test]
    async fn test_unparseable_text_falls_back_to_estimate() {
        let resolver = DateResolver::new(Calibration::default(), FixedOcr("  Imagery  "));
        let resolution = resolver.resolve(1600.0, b"crop").await;
        assert_eq!(resolution.canonical, "est_2024");
        assert_eq!(resolution.raw_ocr_text.as_deref(), Some("Imagery"));
        assert_eq!(resolution.source, DateSource::Estimate);
    }

    #[tokio::test]
    async fn test_ocr_error_is_swallowed() {
        let resolver = DateResolver::new(Calibration::default(), BrokenOcr);
        let resolution = resolver.resolve(1000.0, b"crop").await;
        assert_eq!(resolution.canonical, "est_2013");
        assert!(resolution.raw_ocr_text.is_none());
    }

    #[tokio::test]
    async fn test_empty_region_skips_ocr() {
        let resolver = DateResolver::new(Calibration::default(), FixedOcr("1/1/2020"));
        let resolution = resolver.resolve(400.0, &[]).await;
        assert_eq!(resolution.canonical, "est_2002");
    }
}
