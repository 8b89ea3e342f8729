//! Response caching with TTL
//!
//! Captures are keyed by a [`Fingerprint`] of `(url, width, height)`. A lookup
//! only hits while the entry is younger than the TTL; older entries read as
//! misses until the periodic sweep deletes them.

use crate::Viewport;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Deterministic cache key for one capture request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex SHA-256 of `url:WIDTHxHEIGHT`.
    pub fn new(url: &str, viewport: Viewport) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}x{}", url, viewport.width, viewport.height).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored capture. Never mutated after insertion.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub created_at: Instant,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Concurrent capture cache
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the payload if an entry exists and is younger than the TTL.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(fingerprint)
            .filter(|entry| entry.age(now) < self.ttl)
            .map(|entry| entry.payload.clone());

        match hit {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("webshot_cache_hits_total");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("webshot_cache_misses_total");
            }
        }
        hit
    }

    /// Insert or overwrite. Concurrent writers for the same key: last one wins.
    pub fn put(&self, fingerprint: Fingerprint, payload: Bytes) {
        self.entries.insert(
            fingerprint,
            CacheEntry {
                payload,
                created_at: Instant::now(),
            },
        );
    }

    /// Delete every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.age(now) <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Sweep `cache` every `period` until `shutdown` flips to `true`.
pub fn spawn_sweeper(
    cache: Arc<ResponseCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        info!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Cache sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(width: u32, height: u32) -> Viewport {
        Viewport { width, height }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::new("https://example.com", vp(1280, 720));
        let b = Fingerprint::new("https://example.com", vp(1280, 720));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_any_input() {
        let base = Fingerprint::new("https://example.com", vp(1280, 720));
        assert_ne!(base, Fingerprint::new("https://example.org", vp(1280, 720)));
        assert_ne!(base, Fingerprint::new("https://example.com", vp(1281, 720)));
        assert_ne!(base, Fingerprint::new("https://example.com", vp(1280, 721)));
    }

    #[tokio::test(start_paused = true)]
    async fn get_within_ttl_hits() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        let key = Fingerprint::new("https://example.com", vp(1280, 720));
        cache.put(key.clone(), Bytes::from_static(b"png"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&key), Some(Bytes::from_static(b"png")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_misses_before_sweep() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        let key = Fingerprint::new("https://example.com", vp(1280, 720));
        cache.put(key.clone(), Bytes::from_static(b"png"));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.get(&key), None);
        // Still stored until the sweep runs
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_refreshes() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = Fingerprint::new("https://example.com", vp(800, 600));
        cache.put(key.clone(), Bytes::from_static(b"first"));

        tokio::time::advance(Duration::from_secs(50)).await;
        cache.put(key.clone(), Bytes::from_static(b"second"));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get(&key), Some(Bytes::from_static(b"second")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_entries_and_stops_on_shutdown() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(5)));
        cache.put(
            Fingerprint::new("https://example.com", vp(1280, 720)),
            Bytes::from_static(b"png"),
        );

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
