use std::time::Duration;
use thiserror::Error;

/// Failures produced by a [`Renderer`](crate::Renderer) while launching or capturing.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Renderer launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("Renderer crashed: {0}")]
    Crashed(String),
}

impl RenderError {
    /// Whether the renderer behind the failure can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Crashed(_) | RenderError::Launch(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScreenshotError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No session available within {0:?}")]
    AcquireTimeout(Duration),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Render deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Render failed: {0}")]
    RenderFailure(String),

    #[error("Internal fault: {0}")]
    InternalFault(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl ScreenshotError {
    /// Whether a client retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScreenshotError::AcquireTimeout(_)
                | ScreenshotError::DeadlineExceeded(_)
                | ScreenshotError::RenderFailure(_)
        )
    }

    /// HTTP status the transport answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ScreenshotError::Validation(_) => 400,
            ScreenshotError::DeadlineExceeded(_) => 408,
            ScreenshotError::AcquireTimeout(_) | ScreenshotError::ShuttingDown => 503,
            ScreenshotError::RenderFailure(_)
            | ScreenshotError::InternalFault(_)
            | ScreenshotError::Configuration(_)
            | ScreenshotError::Io(_) => 500,
        }
    }

    /// Stable short name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ScreenshotError::Validation(_) => "validation",
            ScreenshotError::AcquireTimeout(_) => "acquire_timeout",
            ScreenshotError::ShuttingDown => "shutting_down",
            ScreenshotError::DeadlineExceeded(_) => "deadline_exceeded",
            ScreenshotError::RenderFailure(_) => "render_failure",
            ScreenshotError::InternalFault(_) => "internal_fault",
            ScreenshotError::Configuration(_) => "configuration",
            ScreenshotError::Io(_) => "io",
        }
    }

    /// Whether this outcome counts against the timeout counter.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScreenshotError::AcquireTimeout(_)
                | ScreenshotError::ShuttingDown
                | ScreenshotError::DeadlineExceeded(_)
        )
    }
}

impl From<RenderError> for ScreenshotError {
    fn from(err: RenderError) -> Self {
        ScreenshotError::RenderFailure(err.to_string())
    }
}

impl From<std::io::Error> for ScreenshotError {
    fn from(err: std::io::Error) -> Self {
        ScreenshotError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScreenshotError {
    fn from(err: serde_json::Error) -> Self {
        ScreenshotError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_wire_contract() {
        assert_eq!(ScreenshotError::Validation("url".into()).status_code(), 400);
        assert_eq!(
            ScreenshotError::DeadlineExceeded(Duration::from_secs(45)).status_code(),
            408
        );
        assert_eq!(
            ScreenshotError::AcquireTimeout(Duration::from_secs(15)).status_code(),
            503
        );
        assert_eq!(ScreenshotError::ShuttingDown.status_code(), 503);
        assert_eq!(ScreenshotError::RenderFailure("boom".into()).status_code(), 500);
        assert_eq!(ScreenshotError::InternalFault("panic".into()).status_code(), 500);
    }

    #[test]
    fn retryable_errors() {
        assert!(ScreenshotError::AcquireTimeout(Duration::from_secs(1)).is_retryable());
        assert!(ScreenshotError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!ScreenshotError::Validation("missing url".into()).is_retryable());
        assert!(!ScreenshotError::ShuttingDown.is_retryable());
    }

    #[test]
    fn render_errors_become_render_failures() {
        let err: ScreenshotError = RenderError::Crashed("handler ended".into()).into();
        assert!(matches!(err, ScreenshotError::RenderFailure(_)));
        assert!(RenderError::Crashed(String::new()).is_fatal());
        assert!(!RenderError::Navigation(String::new()).is_fatal());
    }
}
