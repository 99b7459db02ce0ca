//! Frame change detection
//!
//! Decides whether two full-frame screenshots show different map content.
//! The default detector compares encoded byte sizes only: it misses frames
//! that differ but compress to the same size, and it flags compression noise
//! as change when the threshold is too low. `PerceptualHashDetector` can be
//! selected in the configuration when that matters.

use image_hasher::{HashAlg, HasherConfig};

/// Compares two encoded frames.
pub trait ChangeDetector {
    fn is_significant_change(&self, baseline: &[u8], candidate: &[u8]) -> bool;
}

/// Byte-size delta heuristic.
///
/// The delta is taken relative to the larger buffer so that the result does
/// not depend on argument order.
#[derive(Debug, Clone, Copy)]
pub struct ByteSizeDetector {
    pub threshold_percent: f64,
}

impl ByteSizeDetector {
    pub fn new(threshold_percent: f64) -> Self {
        Self { threshold_percent }
    }

    /// Size difference between two buffers as a percentage.
    pub fn percent_diff(baseline: &[u8], candidate: &[u8]) -> f64 {
        let larger = baseline.len().max(candidate.len());
        if larger == 0 {
            return 0.0;
        }
        let delta = baseline.len().abs_diff(candidate.len());
        delta as f64 / larger as f64 * 100.0
    }
}

impl Default for ByteSizeDetector {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl ChangeDetector for ByteSizeDetector {
    fn is_significant_change(&self, baseline: &[u8], candidate: &[u8]) -> bool {
        Self::percent_diff(baseline, candidate) > self.threshold_percent
    }
}

/// Gradient perceptual hash compared by Hamming distance.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHashDetector {
    pub max_distance: u32,
}

impl PerceptualHashDetector {
    pub fn new(max_distance: u32) -> Self {
        Self { max_distance }
    }

    fn distance(baseline: &[u8], candidate: &[u8]) -> Option<u32> {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(8, 8)
            .to_hasher();

        let lhs = image::load_from_memory(baseline).ok()?;
        let rhs = image::load_from_memory(candidate).ok()?;
        Some(hasher.hash_image(&lhs).dist(&hasher.hash_image(&rhs)))
    }
}

impl ChangeDetector for PerceptualHashDetector {
    fn is_significant_change(&self, baseline: &[u8], candidate: &[u8]) -> bool {
        if baseline == candidate {
            return false;
        }
        match Self::distance(baseline, candidate) {
            Some(distance) => distance > self.max_distance,
            None => {
                log::debug!("Frame not decodable for hashing, treating as changed");
                true
            }
        }
    }
}

/// Detector picked at runtime from configuration.
#[derive(Debug, Clone, Copy)]
pub enum Detector {
    ByteSize(ByteSizeDetector),
    PerceptualHash(PerceptualHashDetector),
}

impl ChangeDetector for Detector {
    fn is_significant_change(&self, baseline: &[u8], candidate: &[u8]) -> bool {
        match self {
            Detector::ByteSize(d) => d.is_significant_change(baseline, candidate),
            Detector::PerceptualHash(d) => d.is_significant_change(baseline, candidate),
        }
    }
}

/// The most recent unique frame.
///
/// Uniqueness is always judged against the last frame that was itself
/// unique, so a run of gradual changes is detected step by step.
#[derive(Debug, Clone)]
pub struct RollingBaseline {
    frame: Vec<u8>,
}

impl RollingBaseline {
    pub fn new(initial: Vec<u8>) -> Self {
        Self { frame: initial }
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Compare `candidate` to the baseline; on a hit it becomes the baseline.
    pub fn observe<D: ChangeDetector>(&mut self, detector: &D, candidate: &[u8]) -> bool {
        let changed = detector.is_significant_change(&self.frame, candidate);
        if changed {
            self.frame = candidate.to_vec();
        }
        changed
    }
}
