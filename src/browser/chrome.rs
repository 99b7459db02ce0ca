// spider_chrome re-exports chromiumoxide API
use super::{PageDriver, Region};
use crate::error::{is_connection_drop, CaptureError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, NavigateParams, Viewport,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
    settle: Duration,
    load_timeout: Duration,
}

/// Connection mode for Chrome browser
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMode {
    /// Sandboxed mode - launches Chrome using system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
        window: (u32, u32),
    },
    /// Advanced mode - connects to existing Chrome on debug port
    DebugPort(u16),
}

impl ConnectionMode {
    /// CI runners have no display and usually no user namespaces, so a
    /// sandboxed launch there is forced headless without the sandbox.
    pub fn for_ci(self, is_ci: bool) -> Self {
        match self {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
                window,
            } => ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox: no_sandbox || is_ci,
                headless: headless || is_ci,
                window,
            },
            other => other,
        }
    }
}

fn running_in_ci() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
}

/// Map a chromiumoxide failure, promoting dead-connection errors to fatal.
fn classify(context: &str, e: impl std::fmt::Display) -> CaptureError {
    let message = e.to_string();
    if is_connection_drop(&message) {
        CaptureError::ConnectionLost(format!(
            "{}: the browser may have been closed or crashed ({})",
            context, message
        ))
    } else {
        CaptureError::Other(format!("{}: {}", context, message))
    }
}

/// DOM key name, `code` and Windows virtual key code for a key name.
fn key_definition(key: &str) -> (String, String, Option<i64>) {
    match key {
        "Escape" => ("Escape".into(), "Escape".into(), Some(27)),
        "Enter" => ("Enter".into(), "Enter".into(), Some(13)),
        "Tab" => ("Tab".into(), "Tab".into(), Some(9)),
        "ArrowLeft" => ("ArrowLeft".into(), "ArrowLeft".into(), Some(37)),
        "ArrowUp" => ("ArrowUp".into(), "ArrowUp".into(), Some(38)),
        "ArrowRight" => ("ArrowRight".into(), "ArrowRight".into(), Some(39)),
        "ArrowDown" => ("ArrowDown".into(), "ArrowDown".into(), Some(40)),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => {
                    let upper = c.to_ascii_uppercase();
                    let code = if c.is_ascii_digit() {
                        format!("Digit{}", c)
                    } else {
                        format!("Key{}", upper)
                    };
                    (other.to_string(), code, Some(upper as i64))
                }
                _ => (other.to_string(), other.to_string(), None),
            }
        }
    }
}

impl ChromeDriver {
    /// Helper method to get the current active page, excluding Chrome's new-tab-page
    async fn get_active_page(&self) -> Result<chromiumoxide::page::Page> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| classify("Failed to list pages", e))?;

        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| classify("Failed to create page", e))
    }

    /// Launch Chrome with auto-detection for CI environments
    pub async fn launch_auto(
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
        window: (u32, u32),
    ) -> Result<Self> {
        let is_ci = running_in_ci();
        if is_ci {
            log::info!("CI environment detected, launching headless without sandbox");
        }

        let mode = ConnectionMode::Sandboxed {
            chrome_path,
            no_sandbox,
            headless,
            window,
        }
        .for_ci(is_ci);
        Self::new(mode).await
    }

    /// Connect to existing Chrome on debug port (advanced mode)
    pub async fn connect_debug_port(port: u16) -> Result<Self> {
        Self::new(ConnectionMode::DebugPort(port)).await
    }

    /// Create new ChromeDriver with specified connection mode
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
                window,
            } => {
                // Separate profile per instance so runs never share state
                let unique_id = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                let temp_dir =
                    std::env::temp_dir().join(format!("earth-history-chrome-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    CaptureError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };

                // Timeline calibration is in window pixels, so no viewport emulation
                config = config
                    .user_data_dir(&temp_dir)
                    .window_size(window.0, window.1)
                    .viewport(None);

                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }

                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                }

                let launch_help = "Chrome not found. You can:\n\
                     - Install Chrome: https://www.google.com/chrome/\n\
                     - Ubuntu/Debian: sudo apt install chromium-browser\n\
                     - macOS: brew install --cask google-chrome\n\
                     - Or specify path: --chrome-path /path/to/chrome\n\
                     - Linux sandbox issue? Try: --no-sandbox";

                let config = config.build().map_err(|e| {
                    CaptureError::LaunchFailed(format!("{}. \n\n{}", e, launch_help))
                })?;

                let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
                    CaptureError::LaunchFailed(format!("{}. \n\n{}", e, launch_help))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    CaptureError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                (browser, None)
            }
        };

        Ok(Self {
            browser,
            temp_dir,
            settle: Duration::from_millis(1500),
            load_timeout: Duration::from_secs(30),
        })
    }

    /// Fixed delay applied after the document reports ready
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Navigate the single working page to a URL and wait for its load event
    pub async fn navigate(&self, url: &str) -> Result<()> {
        log::info!("Navigating to {}", url);

        let mut pages = self
            .browser
            .pages()
            .await
            .map_err(|e| classify("Failed to list pages", e))?;

        // Keep exactly one page around
        for p in pages.iter().skip(1) {
            let _ = p
                .execute(
                    chromiumoxide::cdp::browser_protocol::target::CloseTargetParams::new(
                        p.target_id().clone(),
                    ),
                )
                .await;
        }
        if pages.len() > 1 {
            pages = self
                .browser
                .pages()
                .await
                .map_err(|e| classify("Failed to list pages", e))?;
        }

        let page = match pages.first() {
            Some(page) => page.clone(),
            None => self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?,
        };

        let params = NavigateParams::builder().url(url).build().map_err(|e| {
            CaptureError::NavigationFailed(format!("Invalid URL {}: {}", url, e))
        })?;

        let response = page.execute(params).await.map_err(|e| {
            let message = e.to_string();
            if is_connection_drop(&message) {
                CaptureError::ConnectionLost(
                    "Browser connection lost. The browser may have been closed or crashed."
                        .to_string(),
                )
            } else {
                CaptureError::NavigationFailed(format!("Failed to navigate to {}: {}", url, e))
            }
        })?;

        if let Some(error_text) = &response.result.error_text {
            log::error!("Navigation error from browser: {}", error_text);
            return Err(CaptureError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(self.load_timeout, page.wait_for_navigation()).await {
            Ok(Ok(_)) => log::debug!("Page load finished for {}", url),
            Ok(Err(e)) => log::warn!("Could not wait for page load: {}", e),
            Err(_) => {
                return Err(CaptureError::Timeout(format!(
                    "page load of {} exceeded {}s",
                    url,
                    self.load_timeout.as_secs()
                )));
            }
        }

        Ok(())
    }

    /// Take a screenshot of the current page
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.get_active_page().await?;

        page.screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| match classify("Failed to take screenshot", e) {
                CaptureError::Other(message) => CaptureError::Screenshot(message),
                fatal => fatal,
            })
    }

    /// Screenshot clipped to a region via Page.captureScreenshot
    pub async fn screenshot_region(&self, region: Region) -> Result<Vec<u8>> {
        use base64::{engine::general_purpose, Engine as _};

        let page = self.get_active_page().await?;
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            clip: Some(Viewport {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                scale: 1.0,
            }),
            ..Default::default()
        };

        let response = page
            .execute(params)
            .await
            .map_err(|e| classify("Page.captureScreenshot failed", e))?;

        general_purpose::STANDARD
            .decode(&response.data)
            .map_err(|e| CaptureError::Screenshot(format!("Invalid screenshot data: {}", e)))
    }

    /// Dispatch a left click (press + release) at viewport coordinates
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        let page = self.get_active_page().await?;

        for event_type in [
            DispatchMouseEventType::MouseMoved,
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let pressing = !matches!(event_type, DispatchMouseEventType::MouseMoved);
            let mut params = DispatchMouseEventParams::new(event_type, x, y);
            if pressing {
                params.button = Some(MouseButton::Left);
                params.click_count = Some(1);
            }
            page.execute(params)
                .await
                .map_err(|e| classify(&format!("Click at ({:.0}, {:.0}) failed", x, y), e))?;
        }

        Ok(())
    }

    /// Press and release a key by DOM key name (e.g. "Escape", "ArrowRight")
    pub async fn key_press(&self, key: &str) -> Result<()> {
        let page = self.get_active_page().await?;
        let (key_name, code, virtual_code) = key_definition(key);

        for event_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut params = DispatchKeyEventParams::new(event_type);
            params.key = Some(key_name.clone());
            params.code = Some(code.clone());
            params.windows_virtual_key_code = virtual_code;
            page.execute(params)
                .await
                .map_err(|e| classify(&format!("Key press '{}' failed", key), e))?;
        }

        Ok(())
    }

    /// Execute arbitrary JavaScript in the page context
    pub async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.get_active_page().await?;

        let result = page
            .evaluate(script)
            .await
            .map_err(|e| classify("Script execution failed", e))?;

        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    /// Get page HTML source
    pub async fn get_page_source(&self) -> Result<String> {
        let page = self.get_active_page().await?;

        page.content()
            .await
            .map_err(|e| classify("Failed to read page source", e))
    }

    /// Get current URL
    pub async fn current_url(&self) -> Result<String> {
        let page = self.get_active_page().await?;

        page.url()
            .await
            .map_err(|e| classify("Failed to read URL", e))?
            .ok_or(CaptureError::NoPage)
    }

    /// Check if the browser is still alive and responsive
    pub async fn is_alive(&self) -> bool {
        match self.browser.pages().await {
            Ok(pages) => {
                if let Some(page) = pages.first() {
                    matches!(
                        tokio::time::timeout(Duration::from_secs(2), page.url()).await,
                        Ok(Ok(_))
                    )
                } else {
                    true
                }
            }
            Err(_) => false,
        }
    }

    /// Close the browser connection
    pub async fn close(self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| CaptureError::Other(e.to_string()))?;
        Ok(())
    }
}

impl PageDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        ChromeDriver::navigate(self, url).await
    }

    async fn screenshot(&self, region: Option<Region>) -> Result<Vec<u8>> {
        match region {
            Some(region) => self.screenshot_region(region).await,
            None => ChromeDriver::screenshot(self).await,
        }
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.click_at(x, y).await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.key_press(key).await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.execute_script(script).await
    }

    async fn await_stable(&self, max_wait: Duration) -> Result<()> {
        let deadline = Instant::now() + max_wait;

        loop {
            let state = self.execute_script("document.readyState").await?;
            if state.as_str() == Some("complete") {
                break;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "Document still '{}' after {}ms, continuing",
                    state.as_str().unwrap_or("unknown"),
                    max_wait.as_millis()
                );
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Tiles keep streaming in after readyState; there is no event for that
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(self.settle.min(remaining)).await;
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        self.get_page_source().await
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        // Clean up temporary directory if it exists
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}
