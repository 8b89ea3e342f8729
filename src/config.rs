//! Configuration management with serde serialization/deserialization
//!
//! This module provides the service configuration, its environment variable
//! overrides, and the viewport resolution rules applied to incoming requests.

use crate::ScreenshotError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_MAX_WORKERS: &str = "MAX_CHROME_WORKERS";
pub const ENV_SCREENSHOT_TIMEOUT: &str = "SCREENSHOT_TIMEOUT";
pub const ENV_WORKER_TIMEOUT: &str = "WORKER_TIMEOUT";
pub const ENV_CACHE_ENABLED: &str = "CACHE_ENABLED";
pub const ENV_CACHE_DURATION: &str = "CACHE_DURATION_SECONDS";
pub const ENV_CHROME_PATH: &str = "CHROME_PATH";
pub const ENV_PORT: &str = "PORT";

/// Main configuration structure for the screenshot service
///
/// Controls the session pool size, the two per-request timers, the response
/// cache and the viewport bounds.
///
/// # Examples
///
/// ```rust
/// use webshot::Config;
///
/// // Use default configuration
/// let config = Config::default();
/// assert_eq!(config.max_sessions, 20);
///
/// // Create custom configuration
/// let config = Config {
///     max_sessions: 4,
///     cache_enabled: false,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of renderer sessions kept in the pool (default: 20)
    ///
    /// This is the hard cap on concurrent renders. Every session is a full
    /// headless browser, so memory grows linearly with this value.
    pub max_sessions: usize,

    /// Deadline for one capture pipeline run (default: 45 seconds)
    pub screenshot_timeout: Duration,

    /// How long a request waits for a free session before giving up (default: 15 seconds)
    pub worker_timeout: Duration,

    /// Serve repeated requests from the response cache (default: true)
    pub cache_enabled: bool,

    /// Maximum age of a cached capture (default: 300 seconds)
    pub cache_ttl: Duration,

    /// Period of the background sweep removing expired entries (default: 60 seconds)
    pub cache_sweep_interval: Duration,

    /// Period of the stats log line (default: 30 seconds)
    pub stats_interval: Duration,

    /// Pause after the page is ready so script-driven content can populate (default: 1 second)
    pub settle_delay: Duration,

    /// Upper bound on how long shutdown may take (default: 5 seconds)
    pub shutdown_grace: Duration,

    pub default_width: u32,
    pub default_height: u32,
    pub max_width: u32,
    pub max_height: u32,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    pub bind: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            screenshot_timeout: Duration::from_secs(45),
            worker_timeout: Duration::from_secs(15),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            default_width: 1280,
            default_height: 720,
            max_width: 3840,
            max_height: 2160,
            chrome_path: None,
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Build a configuration from the process environment on top of the defaults.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides read through `lookup`.
    ///
    /// Numeric values that fail to parse or are not positive keep the current value.
    /// `CACHE_ENABLED` only disables the cache for `false` or `0`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = positive(&lookup, ENV_MAX_WORKERS) {
            self.max_sessions = workers as usize;
        }
        if let Some(secs) = positive(&lookup, ENV_SCREENSHOT_TIMEOUT) {
            self.screenshot_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, ENV_WORKER_TIMEOUT) {
            self.worker_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = lookup(ENV_CACHE_ENABLED) {
            self.cache_enabled = !matches!(flag.trim(), "false" | "0");
        }
        if let Some(secs) = positive(&lookup, ENV_CACHE_DURATION) {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(path) = lookup(ENV_CHROME_PATH).filter(|p| !p.trim().is_empty()) {
            self.chrome_path = Some(path);
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|v| v.trim().parse::<u16>().ok()) {
            self.port = port;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ScreenshotError> {
        if self.max_sessions == 0 {
            return Err(ScreenshotError::Configuration(
                "Session pool size must be greater than 0".into(),
            ));
        }

        if self.screenshot_timeout.is_zero() || self.worker_timeout.is_zero() {
            return Err(ScreenshotError::Configuration(
                "Screenshot and worker timeouts must be greater than 0".into(),
            ));
        }

        if self.cache_enabled && self.cache_ttl.is_zero() {
            return Err(ScreenshotError::Configuration(
                "Cache duration must be greater than 0".into(),
            ));
        }

        if self.cache_sweep_interval.is_zero() || self.stats_interval.is_zero() {
            return Err(ScreenshotError::Configuration(
                "Background task intervals must be greater than 0".into(),
            ));
        }

        if self.default_width == 0
            || self.default_height == 0
            || self.default_width > self.max_width
            || self.default_height > self.max_height
        {
            return Err(ScreenshotError::Configuration(format!(
                "Default viewport {}x{} must fit within 1x1..{}x{}",
                self.default_width, self.default_height, self.max_width, self.max_height
            )));
        }

        Ok(())
    }

    /// Resolve requested width/height into a viewport.
    ///
    /// Absent or out-of-range values fall back to the defaults rather than
    /// rejecting the request.
    pub fn resolve_viewport(&self, width: Option<u32>, height: Option<u32>) -> Viewport {
        Viewport {
            width: width
                .filter(|w| (1..=self.max_width).contains(w))
                .unwrap_or(self.default_width),
            height: height
                .filter(|h| (1..=self.max_height).contains(h))
                .unwrap_or(self.default_height),
        }
    }

    pub fn default_viewport(&self) -> Viewport {
        Viewport {
            width: self.default_width,
            height: self.default_height,
        }
    }
}

fn positive<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Browser viewport used for one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
