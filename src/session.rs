//! Pooled renderer sessions
//!
//! A session wraps one renderer handle and serializes its reuse: captures on
//! the same session never overlap, even if a caller holds it reentrantly. A
//! session whose renderer crashed is flagged and swapped for a fresh renderer
//! before it is handed out again.

use crate::{check_payload, RenderError, Renderer, RendererFactory, ScreenshotError, Viewport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

pub struct Session {
    id: usize,
    renderer: Mutex<Option<Arc<dyn Renderer>>>,
    capture_lock: tokio::sync::Mutex<()>,
    busy: AtomicBool,
    invalidated: AtomicBool,
    last_used_at: Mutex<Instant>,
    capture_count: AtomicU64,
    generation: AtomicU64,
}

impl Session {
    pub(crate) fn new(id: usize, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            id,
            renderer: Mutex::new(Some(renderer)),
            capture_lock: tokio::sync::Mutex::new(()),
            busy: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            last_used_at: Mutex::new(Instant::now()),
            capture_count: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful captures served by this session.
    pub fn capture_count(&self) -> u64 {
        self.capture_count.load(Ordering::Relaxed)
    }

    /// How many times the renderer has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Whether the renderer must be replaced before the next capture.
    pub fn needs_recreate(&self) -> bool {
        if self.is_invalidated() {
            return true;
        }
        match self.renderer() {
            Some(renderer) => !renderer.is_alive(),
            None => true,
        }
    }

    /// Run the capture pipeline under `deadline`.
    ///
    /// Exceeding the deadline aborts the renderer future and yields
    /// [`ScreenshotError::DeadlineExceeded`]. Any other failure is a
    /// [`ScreenshotError::RenderFailure`]; if the renderer died along the way
    /// the session is invalidated.
    pub async fn capture(
        &self,
        url: &str,
        viewport: Viewport,
        deadline: Duration,
    ) -> Result<Vec<u8>, ScreenshotError> {
        let renderer = self.renderer().ok_or_else(|| {
            ScreenshotError::RenderFailure(format!("session {} has no renderer", self.id))
        })?;

        let run = async {
            let _exclusive = self.capture_lock.lock().await;
            renderer.capture(url, viewport).await
        };

        match timeout(deadline, run).await {
            Err(_) => {
                debug!(session = self.id, "Capture exceeded {:?}", deadline);
                Err(ScreenshotError::DeadlineExceeded(deadline))
            }
            Ok(Ok(payload)) => {
                check_payload(&payload)?;
                self.capture_count.fetch_add(1, Ordering::Relaxed);
                Ok(payload)
            }
            Ok(Err(err)) => {
                if err.is_fatal() || !renderer.is_alive() {
                    warn!(session = self.id, "Renderer died during capture: {}", err);
                    self.invalidate();
                }
                Err(err.into())
            }
        }
    }

    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    pub(crate) fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub(crate) fn mark_idle(&self) {
        self.busy.store(false, Ordering::Release);
        *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Swap in a freshly launched renderer and close the old one.
    pub(crate) async fn recreate(&self, factory: &dyn RendererFactory) -> Result<(), RenderError> {
        let fresh = factory.launch(self.id).await?;
        let old = self
            .renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(fresh);
        self.invalidated.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = old {
            old.close().await;
        }
        Ok(())
    }

    /// Close the renderer if one is installed. Each handle is closed once.
    pub(crate) async fn teardown(&self) {
        let renderer = self
            .renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(renderer) = renderer {
            renderer.close().await;
        }
    }

    fn renderer(&self) -> Option<Arc<dyn Renderer>> {
        self.renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .field("invalidated", &self.is_invalidated())
            .field("generation", &self.generation())
            .field("capture_count", &self.capture_count())
            .finish()
    }
}
