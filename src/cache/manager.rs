//! Bounded result cache.

use super::key::Fingerprint;
use crate::types::InferenceResult;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Fingerprint-keyed cache of completed inference results.
///
/// - Size never exceeds `capacity`
/// - Lookups and inserts both refresh recency
/// - Inserting into a full cache evicts the least recently accessed entry
/// - Capacity 0 disables the cache
pub struct ResultCache {
    entries: Option<Mutex<LruCache<Fingerprint, InferenceResult>>>,
    capacity: usize,
    stats: AtomicStats,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            capacity,
            stats: AtomicStats::new(),
        }
    }

    // The LRU list is only touched through `LruCache` methods, which leave it
    // consistent even if a holder panicked, so a poisoned guard is still usable.
    fn lock(
        entries: &Mutex<LruCache<Fingerprint, InferenceResult>>,
    ) -> MutexGuard<'_, LruCache<Fingerprint, InferenceResult>> {
        entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lookup(&self, key: &Fingerprint) -> Option<InferenceResult> {
        let found = self
            .entries
            .as_ref()
            .and_then(|entries| Self::lock(entries).get(key).cloned());
        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key, "cache hit");
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key, "cache miss");
        }
        found
    }

    pub fn insert(&self, key: Fingerprint, value: InferenceResult) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        let displaced = Self::lock(entries).push(key.clone(), value);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        if let Some((old_key, _)) = displaced {
            // `push` also hands back the previous value when the key was already present
            if old_key != key {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %old_key, "cache eviction");
            }
        }
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries
            .as_ref()
            .map(|entries| Self::lock(entries).contains(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .map(|entries| Self::lock(entries).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current size / capacity, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len() as f64 / self.capacity as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}
