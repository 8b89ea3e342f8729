//! Renderer boundary
//!
//! The pool and the capture pipeline only talk to page rendering through these
//! two traits. The production implementation drives headless Chromium (see
//! [`crate::chrome`]); tests plug in scripted fakes.

use crate::{RenderError, Viewport};
use async_trait::async_trait;
use std::sync::Arc;

/// One long-lived rendering engine instance.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Navigate to `url` at `viewport` and return the encoded full-page bitmap.
    async fn capture(&self, url: &str, viewport: Viewport) -> Result<Vec<u8>, RenderError>;

    /// Cheap liveness check; `false` once the underlying engine has died.
    fn is_alive(&self) -> bool;

    /// Tear down the engine. Called at most once per renderer.
    async fn close(&self);
}

/// Creates renderers for pool sessions, both at startup and when a crashed
/// session is recreated.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn launch(&self, session_id: usize) -> Result<Arc<dyn Renderer>, RenderError>;
}

/// Reject payloads that are empty or not a recognizable image.
pub fn check_payload(payload: &[u8]) -> Result<(), RenderError> {
    if payload.is_empty() {
        return Err(RenderError::Encode("renderer returned an empty payload".into()));
    }
    image::guess_format(payload)
        .map(|_| ())
        .map_err(|e| RenderError::Encode(e.to_string()))
}
