//! Process-wide request counters
//!
//! The atomics here back the health snapshot. Every update is mirrored to the
//! `metrics` facade so an installed exporter sees the same numbers.

use crate::{ScreenshotError, SessionPool};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    active_requests: AtomicI64,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    timeout_requests: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new request and hold the active gauge up until the guard drops.
    pub fn begin_request(self: &Arc<Self>) -> ActiveRequest {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("webshot_requests_total");
        metrics::increment_gauge!("webshot_active_requests", 1.0);
        ActiveRequest {
            metrics: self.clone(),
        }
    }

    /// Record how a request ended. Validation errors are not failures.
    pub fn record_failure(&self, error: &ScreenshotError) {
        if matches!(error, ScreenshotError::Validation(_)) {
            return;
        }

        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("webshot_requests_failed_total", "kind" => error.kind());

        if error.is_timeout() {
            self.timeout_requests.fetch_add(1, Ordering::Relaxed);
            metrics::increment_counter!("webshot_requests_timeout_total");
        }
    }

    pub fn record_capture(&self, duration: Duration) {
        metrics::histogram!("webshot_capture_duration_seconds", duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_requests: self.active_requests.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            timeout_requests: self.timeout_requests.load(Ordering::Relaxed),
        }
    }
}

/// Keeps a request counted as active until dropped.
pub struct ActiveRequest {
    metrics: Arc<MetricsRegistry>,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
        metrics::decrement_gauge!("webshot_active_requests", 1.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_requests: i64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
}

/// Log a stats line every `period` until `shutdown` flips to `true`.
pub fn spawn_stats_reporter(
    metrics: Arc<MetricsRegistry>,
    pool: SessionPool,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = metrics.snapshot();
                    metrics::gauge!("webshot_available_sessions", pool.available() as f64);
                    info!(
                        active = snapshot.active_requests,
                        total = snapshot.total_requests,
                        failed = snapshot.failed_requests,
                        timeouts = snapshot.timeout_requests,
                        available = pool.available(),
                        max = pool.capacity(),
                        "Stats"
                    );
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Stats reporter stopped");
    })
}

/// Install the Prometheus recorder and return a handle that renders the scrape body.
pub fn install_prometheus(
) -> Result<metrics_exporter_prometheus::PrometheusHandle, metrics_exporter_prometheus::BuildError>
{
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
