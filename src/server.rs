//! HTTP transport for the screenshot service
//!
//! Routes:
//! - `GET /` usage banner
//! - `GET /get?url=<URL>&width=<W>&height=<H>` PNG capture
//! - `GET /health` JSON health snapshot, 200 when healthy and 429 when degraded
//! - `GET /metrics` Prometheus scrape body, only when an exporter is installed

use crate::{CaptureRequest, ScreenshotError, ScreenshotService};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const USAGE: &str = "webshot - High-Performance Screenshot Service\nEndpoints:\n  /get?url=<URL>&width=<W>&height=<H>\n  /health";

const X_CACHE: &str = "x-cache";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScreenshotService>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<ScreenshotService>) -> Self {
        Self {
            service,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/get", get(capture))
        .route("/health", get(health));

    if state.prometheus.is_some() {
        router = router.route("/metrics", get(metrics));
    }

    router.with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("webshot service running at http://{}/", addr);
        info!("Use /health for monitoring and /get?url=<URL> for screenshots");
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Query parameters of `/get`. Dimensions are kept as text so that a
/// malformed value falls back to the default instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct GetParams {
    pub url: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl GetParams {
    fn into_request(self) -> CaptureRequest {
        CaptureRequest {
            url: self.url,
            width: parse_dimension(self.width.as_deref()),
            height: parse_dimension(self.height.as_deref()),
        }
    }
}

fn parse_dimension(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.trim().parse().ok())
}

async fn index() -> &'static str {
    USAGE
}

async fn capture(
    State(state): State<AppState>,
    Query(params): Query<GetParams>,
) -> Result<Response, ScreenshotError> {
    let capture = state.service.capture(params.into_request()).await?;
    let max_age = state.service.config().cache_ttl.as_secs();

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (HeaderName::from_static(X_CACHE), capture.cache_status.as_str().to_string()),
            (header::CACHE_CONTROL, format!("public, max-age={max_age}")),
        ],
        capture.payload,
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.service.health_snapshot();
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    (status, Json(snapshot))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl IntoResponse for ScreenshotError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self {
            ScreenshotError::Validation(msg) => msg.as_str(),
            ScreenshotError::AcquireTimeout(_) | ScreenshotError::ShuttingDown => {
                "Server busy, please retry later"
            }
            ScreenshotError::DeadlineExceeded(_) => {
                "Screenshot timeout - page took too long to load"
            }
            ScreenshotError::InternalFault(_) => "Internal server error",
            ScreenshotError::RenderFailure(_)
            | ScreenshotError::Configuration(_)
            | ScreenshotError::Io(_) => "Error capturing screenshot",
        };
        (status, format!("{body}\n")).into_response()
    }
}
