//! Scriptable renderer doubles shared by the unit and scenario tests.

use crate::{RenderError, Renderer, RendererFactory, Viewport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Encode a 1x1 PNG whose red channel is `shade`.
pub fn png_with_shade(shade: u8) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([shade, 0, 0, 255]));
    let mut data = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
        .expect("encode test png");
    data
}

pub fn tiny_png() -> Vec<u8> {
    png_with_shade(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Succeed,
    Hang,
    Fail,
    Crash,
    Garbage,
    Panic,
}

#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    pub mode: Mode,
    pub latency: Duration,
}

impl Behavior {
    pub fn succeed() -> Self {
        Self {
            mode: Mode::Succeed,
            latency: Duration::ZERO,
        }
    }

    pub fn hang() -> Self {
        Self {
            mode: Mode::Hang,
            ..Self::succeed()
        }
    }

    pub fn fail() -> Self {
        Self {
            mode: Mode::Fail,
            ..Self::succeed()
        }
    }

    pub fn crash() -> Self {
        Self {
            mode: Mode::Crash,
            ..Self::succeed()
        }
    }

    pub fn garbage() -> Self {
        Self {
            mode: Mode::Garbage,
            ..Self::succeed()
        }
    }

    pub fn panic() -> Self {
        Self {
            mode: Mode::Panic,
            ..Self::succeed()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Tracks how many captures run at once across every renderer of a factory.
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a Concurrency);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

pub struct FakeRenderer {
    behavior: Mutex<Behavior>,
    alive: AtomicBool,
    closed: watch::Sender<bool>,
    captures: AtomicUsize,
    closes: AtomicUsize,
    concurrency: Arc<Concurrency>,
    renders: Arc<AtomicUsize>,
}

impl FakeRenderer {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::shared(
            behavior,
            Arc::new(Concurrency::default()),
            Arc::new(AtomicUsize::new(0)),
        )
    }

    fn shared(
        behavior: Behavior,
        concurrency: Arc<Concurrency>,
        renders: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            alive: AtomicBool::new(true),
            closed: watch::Sender::new(false),
            captures: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            concurrency,
            renders,
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn capture(&self, _url: &str, _viewport: Viewport) -> Result<Vec<u8>, RenderError> {
        let behavior = *self.behavior.lock().unwrap();
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.concurrency.enter();
        let _in_flight = InFlight(&self.concurrency);

        if !behavior.latency.is_zero() {
            tokio::time::sleep(behavior.latency).await;
        }

        match behavior.mode {
            Mode::Succeed => {
                let n = self.renders.fetch_add(1, Ordering::SeqCst);
                Ok(png_with_shade(n as u8))
            }
            // Hangs until the browser is closed underneath it
            Mode::Hang => {
                let mut closed = self.closed.subscribe();
                let _ = closed.wait_for(|closed| *closed).await;
                Err(RenderError::Crashed("browser closed mid-render".into()))
            }
            Mode::Fail => Err(RenderError::Navigation("net::ERR_NAME_NOT_RESOLVED".into())),
            Mode::Crash => {
                self.alive.store(false, Ordering::SeqCst);
                Err(RenderError::Crashed("browser process exited".into()))
            }
            Mode::Garbage => Ok(b"definitely not an image".to_vec()),
            Mode::Panic => panic!("renderer blew up"),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeFactory {
    behavior: Mutex<Behavior>,
    launched: Mutex<Vec<usize>>,
    renderers: Mutex<Vec<Arc<FakeRenderer>>>,
    fail_session: Option<usize>,
    fail_after: usize,
    hang_on_failure: bool,
    concurrency: Arc<Concurrency>,
    renders: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            launched: Mutex::new(Vec::new()),
            renderers: Mutex::new(Vec::new()),
            fail_session: None,
            fail_after: 0,
            hang_on_failure: false,
            concurrency: Arc::new(Concurrency::default()),
            renders: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make launches for `session_id` fail.
    pub fn fail_launch_of(mut self, session_id: usize) -> Self {
        self.fail_session = Some(session_id);
        self
    }

    /// Make launches for `session_id` never resolve.
    pub fn hang_launch_of(mut self, session_id: usize) -> Self {
        self.fail_session = Some(session_id);
        self.hang_on_failure = true;
        self
    }

    /// Only fail once `launches` launches of the failing session succeeded.
    pub fn after(mut self, launches: usize) -> Self {
        self.fail_after = launches;
        self
    }

    /// Change the behavior of every renderer, existing and future.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
        for renderer in self.renderers.lock().unwrap().iter() {
            renderer.set_behavior(behavior);
        }
    }

    pub fn launched(&self) -> Vec<usize> {
        self.launched.lock().unwrap().clone()
    }

    pub fn renderers(&self) -> Vec<Arc<FakeRenderer>> {
        self.renderers.lock().unwrap().clone()
    }

    pub fn total_closes(&self) -> usize {
        self.renderers().iter().map(|r| r.closes()).sum()
    }

    pub fn total_captures(&self) -> usize {
        self.renderers().iter().map(|r| r.captures()).sum()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak()
    }
}

#[async_trait]
impl RendererFactory for FakeFactory {
    async fn launch(&self, session_id: usize) -> Result<Arc<dyn Renderer>, RenderError> {
        if Some(session_id) == self.fail_session {
            let previous = self
                .launched
                .lock()
                .unwrap()
                .iter()
                .filter(|id| **id == session_id)
                .count();
            if previous >= self.fail_after {
                if self.hang_on_failure {
                    futures::future::pending::<()>().await;
                }
                return Err(RenderError::Launch("chromium not found".into()));
            }
        }

        let behavior = *self.behavior.lock().unwrap();
        let renderer = FakeRenderer::shared(behavior, self.concurrency.clone(), self.renders.clone());
        self.launched.lock().unwrap().push(session_id);
        self.renderers.lock().unwrap().push(renderer.clone());
        Ok(renderer)
    }
}
