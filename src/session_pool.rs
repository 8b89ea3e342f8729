//! Session pool management for concurrent renderer instances
//!
//! A fixed set of sessions is created eagerly at startup. A semaphore with one
//! permit per session is the admission gate; the queue behind it holds the
//! sessions that are actually idle. A checkout is a [`PooledSession`] guard
//! that puts the session back when dropped, so a session is returned on every
//! exit path of a request, including deadline cancellation and panics.

use crate::{RendererFactory, ScreenshotError, Session};
use futures::future::join_all;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

struct PoolInner {
    capacity: usize,
    sessions: Vec<Arc<Session>>,
    available: Mutex<VecDeque<Arc<Session>>>,
    permits: Arc<Semaphore>,
    factory: Arc<dyn RendererFactory>,
    is_shutting_down: AtomicBool,
    shutdown: watch::Sender<bool>,
    checked_out: AtomicUsize,
    recreations: AtomicU64,
}

impl PoolInner {
    fn pop_available(&self) -> Option<Arc<Session>> {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn push_available(&self, session: Arc<Session>) {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(session);
    }

    /// Resolves once `shutdown` has been called.
    async fn shutdown_signalled(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives as long as the pool, so this only returns on shutdown
        let _ = rx.wait_for(|down| *down).await;
    }

    async fn recreate(&self, session: &Session) -> Result<(), ScreenshotError> {
        warn!(session = session.id(), "Recreating session renderer");

        if let Err(e) = session.recreate(self.factory.as_ref()).await {
            error!(session = session.id(), "Failed to recreate session: {}", e);
            return Err(ScreenshotError::RenderFailure(format!(
                "session {} could not be recreated: {}",
                session.id(),
                e
            )));
        }

        self.recreations.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("webshot_session_recreations_total");

        // Shutdown may have torn the session down while the new renderer was launching
        if self.is_shutting_down.load(Ordering::Acquire) {
            session.teardown().await;
            return Err(ScreenshotError::ShuttingDown);
        }

        info!(
            session = session.id(),
            generation = session.generation(),
            "Session recreated"
        );
        Ok(())
    }
}

/// Fixed-capacity pool of renderer sessions.
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Launch `capacity` sessions up front. Fails if any launch fails; sessions
    /// launched before the failure are closed again.
    pub async fn initialize(
        capacity: usize,
        factory: Arc<dyn RendererFactory>,
    ) -> Result<Self, ScreenshotError> {
        if capacity == 0 {
            return Err(ScreenshotError::Configuration(
                "Session pool size must be greater than 0".into(),
            ));
        }

        let mut sessions = Vec::with_capacity(capacity);
        for id in 0..capacity {
            match factory.launch(id).await {
                Ok(renderer) => {
                    sessions.push(Arc::new(Session::new(id, renderer)));
                    debug!(session = id, "Session created");
                }
                Err(e) => {
                    error!("Failed to create session {}: {}", id, e);
                    join_all(sessions.iter().map(|s: &Arc<Session>| s.teardown())).await;
                    return Err(ScreenshotError::RenderFailure(format!(
                        "failed to launch session {id}: {e}"
                    )));
                }
            }
        }

        info!("Session pool initialized with {} sessions", capacity);

        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity,
                available: Mutex::new(sessions.iter().cloned().collect()),
                sessions,
                permits: Arc::new(Semaphore::new(capacity)),
                factory,
                is_shutting_down: AtomicBool::new(false),
                shutdown: watch::Sender::new(false),
                checked_out: AtomicUsize::new(0),
                recreations: AtomicU64::new(0),
            }),
        })
    }

    /// Check out a session, waiting at most `wait` for one to become free.
    ///
    /// Resolves to [`ScreenshotError::AcquireTimeout`] once the budget elapses
    /// and to [`ScreenshotError::ShuttingDown`] as soon as the pool is shut
    /// down. A session flagged as crashed is recreated before it is returned;
    /// the relaunch counts against the same `wait` budget.
    pub async fn acquire(&self, wait: Duration) -> Result<PooledSession, ScreenshotError> {
        if self.is_shutting_down() {
            return Err(ScreenshotError::ShuttingDown);
        }
        let started = Instant::now();

        let permit = match timeout(wait, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(ScreenshotError::ShuttingDown),
            Err(_) => return Err(ScreenshotError::AcquireTimeout(wait)),
        };

        let session = self.inner.pop_available().ok_or_else(|| {
            ScreenshotError::InternalFault("permit granted with no idle session".into())
        })?;

        let checkout = PooledSession::new(session, permit, self.inner.clone());

        if checkout.needs_recreate() {
            // On any early return the guard drops and the session goes back still flagged
            let remaining = wait.saturating_sub(started.elapsed());
            tokio::select! {
                recreated = timeout(remaining, self.inner.recreate(&checkout)) => match recreated {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(session = checkout.id(), "Session recreation exceeded {:?}", wait);
                        return Err(ScreenshotError::AcquireTimeout(wait));
                    }
                },
                _ = self.inner.shutdown_signalled() => return Err(ScreenshotError::ShuttingDown),
            }
        }

        debug!(session = checkout.id(), "Session checked out");
        Ok(checkout)
    }

    /// Return a session to the pool. Equivalent to dropping the guard.
    pub fn release(&self, session: PooledSession) {
        session.release();
    }

    /// Refuse all pending and future acquires, then close every renderer,
    /// busy or idle. Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.inner.is_shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down session pool...");
        self.inner.permits.close();
        self.inner.shutdown.send_replace(true);

        join_all(self.inner.sessions.iter().map(|s| s.teardown())).await;

        info!("Session pool shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Sessions that can be checked out right now.
    pub fn available(&self) -> usize {
        self.inner
            .capacity
            .saturating_sub(self.inner.checked_out.load(Ordering::Acquire))
    }

    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::Acquire)
    }

    /// Every session the pool owns, checked out or not.
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.inner.sessions
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.capacity,
            available: self.available(),
            checked_out: self.checked_out(),
            invalidated: self
                .inner
                .sessions
                .iter()
                .filter(|s| s.is_invalidated())
                .count(),
            recreations: self.inner.recreations.load(Ordering::Relaxed),
        }
    }
}

/// A session checked out of the pool.
///
/// The session returns to the pool when this guard is dropped or released.
pub struct PooledSession {
    session: Arc<Session>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    fn new(session: Arc<Session>, permit: OwnedSemaphorePermit, pool: Arc<PoolInner>) -> Self {
        session.mark_busy();
        pool.checked_out.fetch_add(1, Ordering::AcqRel);
        Self {
            session,
            pool,
            _permit: permit,
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session_id", &self.session.id())
            .finish_non_exhaustive()
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.session.mark_idle();
        // The session is queued before the permit field drops, so a granted
        // permit always finds an idle session.
        self.pool.push_available(self.session.clone());
        self.pool.checked_out.fetch_sub(1, Ordering::AcqRel);
        debug!(session = self.session.id(), "Session released");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub checked_out: usize,
    pub invalidated: usize,
    pub recreations: u64,
}
