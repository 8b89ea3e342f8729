//! # webshot
//!
//! An HTTP screenshot service backed by a fixed pool of headless Chromium
//! sessions. Requests for the same URL and viewport are served from a TTL
//! response cache; everything else waits, within a bounded budget, for a free
//! session and renders under a deadline.
//!
//! ## Request lifecycle
//!
//! 1. Validate the request (a missing URL is rejected before any resource is touched)
//! 2. Resolve the viewport, falling back to the defaults for out-of-range sizes
//! 3. Look the fingerprint up in the response cache
//! 4. Check a session out of the pool, waiting at most `worker_timeout`
//! 5. Render under `screenshot_timeout`
//! 6. Store the capture and return the session to the pool
//!
//! A checked-out session is returned on every exit path, including deadline
//! cancellation and panics. A session whose browser crashed is relaunched the
//! next time it is checked out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webshot::{CaptureRequest, Config, ScreenshotService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let service = ScreenshotService::new(config).await?;
//!
//!     let capture = service
//!         .capture(CaptureRequest::new("https://example.com").with_size(1280, 720))
//!         .await?;
//!     println!("Screenshot captured: {} bytes", capture.payload.len());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # HTTP service
//! webshot serve --port 8080 --metrics
//!
//! # One-off capture
//! webshot capture --url https://example.com --output example.png
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Renderer abstraction used by pool sessions
pub mod renderer;

/// Headless Chromium renderer
pub mod chrome;

/// Pooled renderer sessions
pub mod session;

/// Bounded session pool
pub mod session_pool;

/// TTL response cache
pub mod cache;

/// Request counters and background stats reporting
pub mod metrics;

/// Health snapshot served by the HTTP layer
pub mod health;

/// Main screenshot service orchestrating the pipeline
pub mod screenshot_service;

/// HTTP routes
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;


pub use crate::cache::*;
pub use crate::chrome::*;
pub use crate::cli::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::health::*;
pub use crate::metrics::{
    install_prometheus, spawn_stats_reporter, ActiveRequest, MetricsRegistry, MetricsSnapshot,
};
pub use crate::renderer::*;
pub use crate::screenshot_service::*;
pub use crate::server::*;
pub use crate::session::*;
pub use crate::session_pool::*;
pub use crate::utils::*;
