//! Bounded TTL cache
//!
//! A generic key/value cache where every entry expires a fixed time after it was
//! written and the number of live entries never exceeds a configured bound.
//!
//! # Eviction
//!
//! Inserting a new key into a full cache first drops every expired entry. If the
//! cache is still full, the entry closest to expiring is evicted. Overwriting an
//! existing key never evicts.
//!
//! # Cleanup
//!
//! When constructed inside a tokio runtime, a background task sweeps expired
//! entries every `cleanup_period`. The task stops on [`TtlCache::close`] or when
//! the cache is dropped. Outside a runtime no task is spawned and expiry is lazy.
//!
//! Time is read from `tokio::time::Instant`, so tests can pause and advance it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cache sizing and expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of live entries; 0 disables the bound
    pub max_size: usize,
    /// Lifetime of an entry after it was written
    pub ttl: Duration,
    /// Interval between background sweeps; zero disables the sweeper
    pub cleanup_period: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(30 * 60),
            cleanup_period: Duration::from_secs(60),
        }
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet read or swept
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    items: RwLock<HashMap<K, Entry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Eq + Hash, V> Inner<K, V> {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut items = self.items.write().expect("cache lock poisoned");
        self.purge_expired_locked(&mut items, now)
    }

    fn purge_expired_locked(&self, items: &mut HashMap<K, Entry<V>>, now: Instant) -> usize {
        let before = items.len();
        items.retain(|_, entry| entry.expires_at > now);
        let removed = before - items.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

/// Thread-safe cache with per-entry expiry and a size bound
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
    config: CacheConfig,
    shutdown: CancellationToken,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and, inside a runtime, start its cleanup task
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(Inner {
            items: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        });
        let shutdown = CancellationToken::new();

        if !config.cleanup_period.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(cleanup_loop(
                    Arc::downgrade(&inner),
                    config.cleanup_period,
                    shutdown.clone(),
                ));
            }
        }

        Self {
            inner,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or overwrite `key`, expiring `ttl` from now
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut items = self.inner.items.write().expect("cache lock poisoned");

        let max = self.config.max_size;
        if max > 0 && !items.contains_key(&key) && items.len() >= max {
            self.inner.purge_expired_locked(&mut items, now);
            if items.len() >= max {
                let nearest = items
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(nearest) = nearest {
                    items.remove(&nearest);
                    self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        items.insert(
            key,
            Entry {
                value,
                expires_at: now + self.config.ttl,
            },
        );
    }

    /// Value for `key` if present and unexpired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let items = self.inner.items.read().expect("cache lock poisoned");
            match items.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it now rather than waiting for the sweeper
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let mut items = self.inner.items.write().expect("cache lock poisoned");
        if items.get(key).is_some_and(|entry| entry.expires_at <= now) {
            items.remove(key);
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Remove `key` whether or not it expired
    pub fn delete(&self, key: &K) {
        self.inner
            .items
            .write()
            .expect("cache lock poisoned")
            .remove(key);
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Counters and current size
    ///
    /// `size` is the raw entry count. Expired entries stay in it until a read,
    /// a sweep or [`purge_expired`](Self::purge_expired) drops them.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.items.read().expect("cache lock poisoned").len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Stop the cleanup task; idempotent
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn cleanup_loop<K: Eq + Hash, V>(
    inner: Weak<Inner<K, V>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let removed = inner.purge_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        }
    }
}
