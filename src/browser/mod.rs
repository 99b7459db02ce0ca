pub mod chrome;
pub mod locator;

pub use chrome::{ChromeDriver, ConnectionMode};
pub use locator::UiLocator;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rectangle in CSS pixels, used to clip screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// What the capture pipeline needs from a browser page.
///
/// `ChromeDriver` is the real implementation; tests drive the pipeline with
/// scripted pages.
#[allow(async_fn_in_trait)]
pub trait PageDriver {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// PNG screenshot of the viewport, or of `region` when given.
    async fn screenshot(&self, region: Option<Region>) -> Result<Vec<u8>>;

    async fn click(&self, x: f64, y: f64) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Block until the page looks settled, for at most `max_wait`.
    async fn await_stable(&self, max_wait: Duration) -> Result<()>;

    async fn page_source(&self) -> Result<String>;
}
