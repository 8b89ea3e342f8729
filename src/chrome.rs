//! Headless Chromium renderer
//!
//! Each pool session owns one Chromium process driven over the DevTools
//! protocol. The CDP handler stream is polled on its own task; when that task
//! finishes the browser is considered dead and the session gets recreated on
//! its next checkout.

use crate::{validate_url, Config, RenderError, Renderer, RendererFactory, Viewport};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Element whose presence marks the page as ready.
const READY_SELECTOR: &str = "body";

/// Encoder quality sent with every capture. The DevTools protocol only
/// applies it to JPEG and WebP, so PNG captures are lossless regardless.
const CAPTURE_QUALITY: i64 = 90;

/// How long a graceful browser close may take before the process is killed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Generate Chrome command-line arguments for one session's browser.
///
/// Every launch gets its own user data directory so concurrent instances never
/// trip over Chrome's process singleton.
pub fn chrome_args(config: &Config, user_data_dir: &std::path::Path) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--hide-scrollbars".to_string(),
        "--metrics-recording-only".to_string(),
        "--mute-audio".to_string(),
        "--no-first-run".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--disable-web-security".to_string(),
        "--disable-features=site-per-process,TranslateUI,BlinkGenPropertyTrees".to_string(),
        format!(
            "--window-size={},{}",
            config.default_width, config.default_height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ]
}

/// Launches one Chromium per session.
pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn browser_config(&self, user_data_dir: &std::path::Path) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.default_width, self.config.default_height)
            .args(chrome_args(&self.config, user_data_dir));

        if let Some(chrome_path) = &self.config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        builder.build().map_err(RenderError::Launch)
    }
}

#[async_trait]
impl RendererFactory for ChromeLauncher {
    async fn launch(&self, session_id: usize) -> Result<Arc<dyn Renderer>, RenderError> {
        let user_data_dir = std::env::temp_dir().join(format!(
            "webshot-{}-{}-{}",
            std::process::id(),
            session_id,
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|e| RenderError::Launch(format!("failed to create user data dir: {e}")))?;

        let browser_config = self.browser_config(&user_data_dir)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!(session = session_id, "CDP handler error: {}", e);
                    break;
                }
            }
            debug!(session = session_id, "CDP handler stream ended");
        });

        info!(session = session_id, "Chromium launched");

        Ok(Arc::new(ChromeRenderer {
            session_id,
            browser: Mutex::new(browser),
            handler: handler_task,
            user_data_dir,
            settle_delay: self.config.settle_delay,
        }))
    }
}

fn screenshot_params() -> ScreenshotParams {
    ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .quality(CAPTURE_QUALITY)
        .full_page(true)
        .build()
}

pub struct ChromeRenderer {
    session_id: usize,
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
    settle_delay: Duration,
}

impl ChromeRenderer {
    fn classify(&self, err: impl std::fmt::Display) -> RenderError {
        if self.is_alive() {
            RenderError::Navigation(err.to_string())
        } else {
            RenderError::Crashed(err.to_string())
        }
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn capture(&self, url: &str, viewport: Viewport) -> Result<Vec<u8>, RenderError> {
        validate_url(url)?;

        // Browser lock covers page bookkeeping only; close() must not queue behind a capture
        let page = {
            let browser = self.browser.lock().await;

            // Pages survive an aborted capture; clear them before starting over
            if let Ok(stale) = browser.pages().await {
                for page in stale {
                    let _ = page.close().await;
                }
            }

            browser
                .new_page("about:blank")
                .await
                .map_err(|e| self.classify(e))?
        };

        let result = async {
            let metrics = SetDeviceMetricsOverrideParams::builder()
                .width(viewport.width)
                .height(viewport.height)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(RenderError::Navigation)?;
            page.execute(metrics).await.map_err(|e| self.classify(e))?;

            // goto resolves once the navigation has committed
            page.goto(url).await.map_err(|e| self.classify(e))?;
            page.find_element(READY_SELECTOR)
                .await
                .map_err(|e| self.classify(e))?;

            sleep(self.settle_delay).await;

            page.screenshot(screenshot_params())
                .await
                .map_err(|e| match self.classify(e) {
                    RenderError::Navigation(msg) => RenderError::Encode(msg),
                    other => other,
                })
        }
        .await;

        if let Err(e) = page.close().await {
            debug!(session = self.session_id, "Failed to close page: {}", e);
        }

        result
    }

    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        match timeout(CLOSE_TIMEOUT, browser.close()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(session = self.session_id, "Failed to close browser: {}", e);
                let _ = browser.kill().await;
            }
            Err(_) => {
                warn!(session = self.session_id, "Browser close timed out, killing it");
                let _ = browser.kill().await;
            }
        }
        drop(browser);
        // In-flight page commands fail once the handler is gone
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(session = self.session_id, "Failed to remove user data dir: {}", e);
        }
        info!(session = self.session_id, "Chromium closed");
    }
}
