//! Expiring cache with tick-based TTL.
//!
//! Entries carry a countdown of remaining ticks. Reads never touch the
//! countdown; only [`ExpiringCache::sweep`] does, once per tick, evicting
//! entries that reach zero. An entry's life is extended only by
//! overwriting it with [`ExpiringCache::set`].
//!
//! Cache statistics (hits, misses, evictions) are emitted as `tracing`
//! fields on every sweep that evicts something.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A cached value and its remaining life in ticks.
struct CacheEntry<V> {
    value: V,
    remaining: u32,
}

/// Accumulated cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// Thread-safe flat key → value cache shared by every database and collection.
pub struct ExpiringCache<V> {
    inner: Mutex<Inner<V>>,
    enabled: AtomicBool,
    default_ttl: AtomicU32,
}

impl<V: Clone> ExpiringCache<V> {
    /// Create a cache. `default_ttl` is used for `set` calls with no TTL
    /// (or a TTL of zero).
    pub fn new(enabled: bool, default_ttl: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            enabled: AtomicBool::new(enabled),
            default_ttl: AtomicU32::new(default_ttl.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or bypass the cache. Disabling also drops every entry, so a
    /// later re-enable never serves results cached before the pause.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if was && !enabled {
            let dropped = self.clear();
            tracing::info!(dropped, "cache disabled");
        } else if !was && enabled {
            tracing::info!("cache enabled");
        }
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl.load(Ordering::Relaxed)
    }

    /// Change the TTL used when a `set` gives none. Zero is ignored.
    pub fn set_default_ttl(&self, ticks: u32) {
        if ticks > 0 {
            self.default_ttl.store(ticks, Ordering::Relaxed);
        }
    }

    /// Look up a live entry. Always a miss while the cache is disabled.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let mut inner = self.lock();
        let value = inner.entries.get(key).map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                inner.stats.hits += 1;
                tracing::debug!(key = %key, hits = inner.stats.hits, "cache hit");
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                tracing::debug!(key = %key, misses = inner.stats.misses, "cache miss");
                None
            }
        }
    }

    /// Insert or overwrite `key` with a fresh countdown. A no-op while disabled.
    pub fn set(&self, key: &str, value: V, ttl: Option<u32>) {
        if !self.is_enabled() {
            return;
        }
        let remaining = match ttl {
            Some(ticks) if ticks > 0 => ticks,
            _ => self.default_ttl(),
        };
        let mut inner = self.lock();
        inner
            .entries
            .insert(key.to_string(), CacheEntry { value, remaining });
        tracing::debug!(key = %key, ttl = remaining, entries = inner.entries.len(), "cache set");
    }

    /// Advance one tick: decrement every entry and evict those at zero.
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| {
            entry.remaining = entry.remaining.saturating_sub(1);
            entry.remaining > 0
        });
        let evicted = before - inner.entries.len();
        if evicted > 0 {
            inner.stats.evictions += evicted as u64;
            tracing::debug!(
                evicted,
                remaining = inner.entries.len(),
                cache_hits = inner.stats.hits,
                cache_misses = inner.stats.misses,
                cache_evictions = inner.stats.evictions,
                "cache sweep"
            );
        }
        evicted
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        before - inner.entries.len()
    }

    /// Drop every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining ticks for `key`, if cached.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        self.lock().entries.get(key).map(|entry| entry.remaining)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("default_ttl", &self.default_ttl.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
