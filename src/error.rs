use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Browser connection lost: {0}")]
    ConnectionLost(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("No page available")]
    NoPage,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Historical imagery mode did not engage: {0}")]
    ModeActivation(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Invalid location '{0}': expected \"latitude,longitude\"")]
    InvalidLocation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Archive creation failed: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

impl CaptureError {
    /// Whether this error means the browser itself is gone, so scanning
    /// further positions cannot succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            CaptureError::ConnectionLost(_)
            | CaptureError::ConnectionFailed(_)
            | CaptureError::LaunchFailed(_)
            | CaptureError::NoPage => true,
            CaptureError::CdpError(e) => is_connection_drop(&e.to_string()),
            _ => false,
        }
    }
}

/// chromiumoxide reports a dead websocket as a cancelled oneshot channel.
pub(crate) fn is_connection_drop(message: &str) -> bool {
    message.contains("oneshot canceled") || message.contains("channel closed")
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CaptureError::ConnectionLost("gone".into()).is_fatal());
        assert!(CaptureError::NoPage.is_fatal());
        assert!(!CaptureError::Timeout("click".into()).is_fatal());
        assert!(!CaptureError::Screenshot("blank".into()).is_fatal());
        assert!(!CaptureError::ModeActivation("3 attempts".into()).is_fatal());
    }

    #[test]
    fn test_connection_drop_detection() {
        assert!(is_connection_drop("send failed: oneshot canceled"));
        assert!(!is_connection_drop("Navigation error: net::ERR_NAME_NOT_RESOLVED"));
    }
}
