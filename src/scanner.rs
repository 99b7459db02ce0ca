//! Timeline scanning
//!
//! Walks the historical-imagery slider left to right at a fixed number of
//! positions. Every probe is recorded as a `Sample`; the ones whose frame
//! differs from the rolling baseline are flagged unique.

use crate::date::DateResolver;
use crate::detect::{ChangeDetector, RollingBaseline};
use crate::error::Result;
use crate::ocr::OcrEngine;
use crate::session::{CaptureSession, ProbeFailure, Sample};
use serde::{Deserialize, Serialize};

/// Horizontal pixel range of the timeline and how densely to sample it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRange {
    pub start_x: f64,
    pub end_x: f64,
    pub num_points: usize,
    /// Vertical position of the slider track
    pub timeline_y: f64,
}

impl Default for ScanRange {
    fn default() -> Self {
        Self {
            start_x: 400.0,
            end_x: 1600.0,
            num_points: 25,
            timeline_y: 980.0,
        }
    }
}

impl ScanRange {
    pub fn step(&self) -> f64 {
        if self.num_points == 0 {
            return 0.0;
        }
        (self.end_x - self.start_x) / self.num_points as f64
    }

    /// `start_x + i * step` for `i` in `0..num_points`
    pub fn positions(&self) -> Vec<f64> {
        let step = self.step();
        (0..self.num_points)
            .map(|i| self.start_x + i as f64 * step)
            .collect()
    }

    /// Where `pixel_x` falls along the range, as a percentage in `[0, 100]`.
    pub fn relative_percent(&self, pixel_x: f64) -> f64 {
        let width = self.end_x - self.start_x;
        if width.abs() < f64::EPSILON {
            return 0.0;
        }
        ((pixel_x - self.start_x) / width * 100.0).clamp(0.0, 100.0)
    }
}

/// What a probe brings back from one timeline position.
#[derive(Debug, Clone)]
pub struct ProbeCapture {
    pub frame: Vec<u8>,
    pub date_region: Vec<u8>,
}

/// Moves the timeline to `x` and captures the result.
#[allow(async_fn_in_trait)]
pub trait Probe {
    async fn probe(&mut self, x: f64) -> Result<ProbeCapture>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub probed: usize,
    pub unique: usize,
    pub failed: usize,
}

pub struct TimelineScanner<D> {
    range: ScanRange,
    detector: D,
}

impl<D: ChangeDetector> TimelineScanner<D> {
    pub fn new(range: ScanRange, detector: D) -> Self {
        Self { range, detector }
    }

    pub fn range(&self) -> &ScanRange {
        &self.range
    }

    /// Scan the whole range, appending every successful probe to `session`.
    ///
    /// `initial_baseline` is the full-page screenshot taken before the first
    /// probe. Transient probe errors are recorded and skipped. A fatal error
    /// marks the session failed and is returned; samples gathered up to that
    /// point stay in the session.
    pub async fn scan<P: Probe, O: OcrEngine>(
        &self,
        initial_baseline: Vec<u8>,
        probe: &mut P,
        resolver: &DateResolver<O>,
        session: &mut CaptureSession,
    ) -> Result<ScanSummary> {
        let mut baseline = RollingBaseline::new(initial_baseline);
        let mut summary = ScanSummary::default();
        let positions = self.range.positions();

        log::info!(
            "Scanning {} positions from x={:.0} to x={:.0} (step {:.1})",
            positions.len(),
            self.range.start_x,
            self.range.end_x,
            self.range.step()
        );

        for (i, x) in positions.into_iter().enumerate() {
            let sequence_index = i + 1;

            let capture = match probe.probe(x).await {
                Ok(capture) => capture,
                Err(e) if e.is_fatal() => {
                    log::error!(
                        "Scan aborted at position {} (x={:.0}): {}",
                        sequence_index,
                        x,
                        e
                    );
                    session.mark_failed(format!(
                        "scan aborted at position {}: {}",
                        sequence_index, e
                    ));
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "Probe {} at x={:.0} failed, skipping: {}",
                        sequence_index,
                        x,
                        e
                    );
                    summary.failed += 1;
                    session.push_failure(ProbeFailure {
                        sequence_index,
                        pixel_x: x,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let is_unique_frame = baseline.observe(&self.detector, &capture.frame);
            let date = resolver.resolve(x, &capture.date_region).await;

            log::info!(
                "Position {}/{} x={:.0}: {} ({} bytes){}",
                sequence_index,
                self.range.num_points,
                x,
                date.canonical,
                capture.frame.len(),
                if is_unique_frame { " [unique]" } else { "" }
            );

            summary.probed += 1;
            if is_unique_frame {
                summary.unique += 1;
            }

            session.push_sample(Sample {
                sequence_index,
                pixel_x: x,
                estimated_year: date.estimated_year,
                frame_bytes: capture.frame,
                date_region_bytes: capture.date_region,
                date,
                is_unique_frame,
            });
        }

        Ok(summary)
    }
}
