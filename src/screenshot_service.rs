//! Main screenshot service orchestrating the capture pipeline
//!
//! This module provides the `ScreenshotService` that owns the session pool,
//! the response cache, the request counters and the background tasks, and
//! runs each capture request through cache lookup, session checkout, render
//! and cache store.

use crate::{
    spawn_stats_reporter, spawn_sweeper, ChromeLauncher, Config, Fingerprint, HealthSnapshot,
    MetricsRegistry, RendererFactory, ResponseCache, ScreenshotError, SessionPool, Viewport,
};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// One inbound capture request, before validation.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl CaptureRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful capture, either freshly rendered or served from the cache.
#[derive(Debug, Clone)]
pub struct Capture {
    pub payload: Bytes,
    pub cache_status: CacheStatus,
    pub viewport: Viewport,
}

/// Screenshot service with a bounded renderer session pool
///
/// Construct it once at startup, share it behind an `Arc`, and call
/// [`shutdown`](Self::shutdown) once on termination.
///
/// # Examples
///
/// ```rust,no_run
/// use webshot::{CaptureRequest, Config, ScreenshotService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = ScreenshotService::new(Config::default()).await?;
///
///     let capture = service
///         .capture(CaptureRequest::new("https://example.com"))
///         .await?;
///     println!("Captured {} bytes ({})", capture.payload.len(), capture.cache_status);
///
///     service.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ScreenshotService {
    pool: SessionPool,
    cache: Option<Arc<ResponseCache>>,
    metrics: Arc<MetricsRegistry>,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ScreenshotService {
    /// Start the service backed by headless Chromium.
    pub async fn new(config: Config) -> Result<Self, ScreenshotError> {
        let launcher = Arc::new(ChromeLauncher::new(config.clone()));
        Self::with_factory(config, launcher).await
    }

    /// Start the service with a custom renderer factory.
    pub async fn with_factory(
        config: Config,
        factory: Arc<dyn RendererFactory>,
    ) -> Result<Self, ScreenshotError> {
        config.validate()?;

        let pool = SessionPool::initialize(config.max_sessions, factory).await?;
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = config
            .cache_enabled
            .then(|| Arc::new(ResponseCache::new(config.cache_ttl)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut background = vec![spawn_stats_reporter(
            metrics.clone(),
            pool.clone(),
            config.stats_interval,
            shutdown_rx.clone(),
        )];
        if let Some(cache) = &cache {
            background.push(spawn_sweeper(
                cache.clone(),
                config.cache_sweep_interval,
                shutdown_rx,
            ));
        }

        info!(
            "Screenshot service started with {} sessions, cache: {} ({:?})",
            config.max_sessions, config.cache_enabled, config.cache_ttl
        );

        Ok(Self {
            pool,
            cache,
            metrics,
            config,
            shutdown_tx,
            background: Mutex::new(background),
        })
    }

    /// Serve one capture request.
    ///
    /// Panics raised while handling the request are turned into
    /// [`ScreenshotError::InternalFault`]; any session checked out by the
    /// request has been returned to the pool by then.
    pub async fn capture(&self, request: CaptureRequest) -> Result<Capture, ScreenshotError> {
        let _active = self.metrics.begin_request();
        let span = info_span!(
            "capture",
            request_id = %uuid::Uuid::new_v4(),
            url = request.url.as_deref().unwrap_or_default(),
        );

        let result = AssertUnwindSafe(self.orchestrate(request))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!("Panic while capturing: {}", message);
                Err(ScreenshotError::InternalFault(message))
            });

        if let Err(e) = &result {
            self.metrics.record_failure(e);
        }
        result
    }

    async fn orchestrate(&self, request: CaptureRequest) -> Result<Capture, ScreenshotError> {
        let url = request
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ScreenshotError::Validation("'url' parameter is required".into()))?;
        let viewport = self.config.resolve_viewport(request.width, request.height);
        let fingerprint = Fingerprint::new(&url, viewport);

        if let Some(payload) = self.cache.as_ref().and_then(|c| c.get(&fingerprint)) {
            debug!(%url, %viewport, "Cache hit");
            return Ok(Capture {
                payload,
                cache_status: CacheStatus::Hit,
                viewport,
            });
        }

        let session = self
            .pool
            .acquire(self.config.worker_timeout)
            .await
            .map_err(|e| {
                warn!(%url, "Failed to get session: {}", e);
                e
            })?;

        let started = Instant::now();
        let payload = session
            .capture(&url, viewport, self.config.screenshot_timeout)
            .await
            .map_err(|e| {
                warn!(%url, session = session.id(), "Error capturing screenshot: {}", e);
                e
            })?;
        let payload = Bytes::from(payload);
        self.metrics.record_capture(started.elapsed());

        if let Some(cache) = &self.cache {
            cache.put(fingerprint, payload.clone());
        }
        session.release();

        info!(%url, %viewport, bytes = payload.len(), elapsed = ?started.elapsed(), "Captured");
        Ok(Capture {
            payload,
            cache_status: CacheStatus::Miss,
            viewport,
        })
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::new(self.metrics.snapshot(), &self.pool.stats())
    }

    /// Stop background tasks and shut the pool down, bounded by the
    /// configured grace period. Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        info!("Shutting down screenshot service...");
        let grace = self.config.shutdown_grace;

        if timeout(grace, self.pool.shutdown()).await.is_err() {
            warn!("Session pool did not shut down within {:?}", grace);
        }

        let handles: Vec<_> = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let abort = handle.abort_handle();
            if timeout(grace, handle).await.is_err() {
                abort.abort();
            }
        }

        info!("Screenshot service shutdown complete");
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_deref()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
