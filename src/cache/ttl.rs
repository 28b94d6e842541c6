use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::clock::{Clock, SystemClock};

/// One stored value with its expiry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// `None` when the ttl is too large to represent, i.e. never expires
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.checked_add_signed(self.ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now > expires_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries physically held, expired ones included until swept
    pub entries: usize,
}

/// In-memory key/value store with per-entry expiry
///
/// Expired entries are hidden from `get` immediately and only reclaimed by
/// `sweep_expired`. All mutation happens under the table's write lock, so a
/// reader sees either a whole entry or a clean miss.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                None
            }
        }
    }

    /// Store `value`, replacing any previous entry for `key`
    ///
    /// A ttl of zero or less stores nothing and drops the previous entry.
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if ttl <= Duration::zero() {
            entries.remove(key);
            debug!(key, "non-positive ttl, value not cached");
            return;
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                created_at: self.clock.now(),
                ttl,
            },
        );
        debug!(key, ttl_secs = ttl.num_seconds(), "cached");
    }

    pub fn put_default(&self, key: &str, value: V) {
        self.put(key, value, self.default_ttl);
    }

    /// Remove one entry; returns whether it existed
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_matching(|key| key.starts_with(prefix))
    }

    /// Remove every entry whose key satisfies `selector`
    pub fn invalidate_matching<F>(&self, selector: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.invalidate_where(|key, _| selector(key))
    }

    /// Remove every entry, live or expired, for which `selector` holds on key and value
    pub fn invalidate_where<F>(&self, selector: F) -> usize
    where
        F: Fn(&str, &V) -> bool,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, entry| !selector(key, &entry.value));
        let removed = before - entries.len();
        debug!(removed, "invalidated cache entries");
        removed
    }

    /// Physically drop expired entries and return how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        debug!(removed, "swept expired cache entries");
        removed
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
