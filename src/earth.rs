//! Google Earth Web specifics: URL building, historical imagery mode and the
//! per-position timeline probe.

use crate::browser::PageDriver;
use crate::config::{CameraSettings, DateCrop, UiSettings, WaitSettings};
use crate::detect::ChangeDetector;
use crate::error::{CaptureError, Result};
use crate::scanner::{Probe, ProbeCapture};
use crate::session::Coordinates;
use std::time::Duration;

pub const EARTH_BASE_URL: &str = "https://earth.google.com/web";

/// Camera URL centred on `coords`, looking straight down.
pub fn earth_url(coords: &Coordinates, camera: &CameraSettings) -> String {
    format!(
        "{}/@{},{},{}a,{}d,35y,0h,0t,0r",
        EARTH_BASE_URL, coords.latitude, coords.longitude, camera.altitude_m, camera.distance_m
    )
}

/// Press each dismiss key once, ignoring failures.
pub async fn dismiss_overlays<P: PageDriver>(page: &P, keys: &[String]) -> Result<()> {
    for key in keys {
        match page.press_key(key).await {
            Ok(()) => log::debug!("Pressed {}", key),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("Could not press {}: {}", key, e),
        }
    }
    Ok(())
}

async fn timeline_visible<P: PageDriver>(page: &P, ui: &UiSettings) -> Result<bool> {
    match ui.timeline.locate(page).await {
        Ok(found) => Ok(found.is_some()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::debug!("Timeline lookup failed: {}", e);
            Ok(false)
        }
    }
}

/// Switch historical imagery on.
///
/// With a searchable timeline locator, the mode counts as engaged once the
/// timeline is found. With a fixed-coordinate timeline there is nothing to
/// look for, so a significant frame change after clicking the toggle is
/// taken as success instead.
pub async fn activate_history_mode<P, D>(
    page: &P,
    ui: &UiSettings,
    detector: &D,
    waits: &WaitSettings,
) -> Result<()>
where
    P: PageDriver,
    D: ChangeDetector,
{
    let searchable = ui.timeline.searches_page();
    if searchable && timeline_visible(page, ui).await? {
        log::info!("Historical imagery already active");
        return Ok(());
    }

    let attempts = waits.mode_activation_retries.max(1);
    for attempt in 1..=attempts {
        log::info!("Activating historical imagery (attempt {}/{})", attempt, attempts);

        let before = if searchable {
            None
        } else {
            Some(page.screenshot(None).await?)
        };

        let target = match ui.history_toggle.locate(page).await {
            Ok(target) => target,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("History toggle lookup failed: {}", e);
                None
            }
        };
        let Some((x, y)) = target else {
            log::warn!("History toggle not found");
            page.await_stable(waits.after_click()).await?;
            continue;
        };

        page.click(x, y).await?;
        page.await_stable(waits.after_click()).await?;

        let engaged = match before {
            None => timeline_visible(page, ui).await?,
            Some(before) => {
                let after = page.screenshot(None).await?;
                detector.is_significant_change(&before, &after)
            }
        };
        if engaged {
            log::info!("Historical imagery active after {} attempt(s)", attempt);
            return Ok(());
        }
    }

    Err(CaptureError::ModeActivation(format!(
        "historical imagery did not engage after {} attempt(s)",
        attempts
    )))
}

/// Moves the timeline slider and captures what Earth shows there.
pub struct TimelineProbe<'a, P> {
    page: &'a P,
    timeline_y: f64,
    crop: DateCrop,
    settle: Duration,
}

impl<'a, P: PageDriver> TimelineProbe<'a, P> {
    pub fn new(page: &'a P, timeline_y: f64, crop: DateCrop, settle: Duration) -> Self {
        Self {
            page,
            timeline_y,
            crop,
            settle,
        }
    }
}

impl<P: PageDriver> Probe for TimelineProbe<'_, P> {
    async fn probe(&mut self, x: f64) -> Result<ProbeCapture> {
        self.page.click(x, self.timeline_y).await?;
        self.page.await_stable(self.settle).await?;

        let frame = self.page.screenshot(None).await?;

        // A missing crop only costs the OCR date
        let region = self.crop.region_at(x, self.timeline_y);
        let date_region = match self.page.screenshot(Some(region)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Date label capture at x={:.0} failed: {}", x, e);
                Vec::new()
            }
        };

        Ok(ProbeCapture { frame, date_region })
    }
}
