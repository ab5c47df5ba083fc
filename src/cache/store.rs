//! Concurrent key → value store with stale reads.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::entry::{CacheEntry, CacheSummary, StaleRead};
use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;

/// A thread-safe cache that keeps expired values around for fallback reads.
///
/// Entries are replaced whole under the shard lock, so a reader never sees a
/// partially written value. Nothing is evicted in the background; the key
/// space is the fixed set of upstream resources the application reads.
#[derive(Clone)]
pub struct StaleCache<T> {
    inner: Arc<DashMap<String, CacheEntry<T>>>,
    clock: SharedClock,
}

impl<T: Clone> StaleCache<T> {
    /// Create an empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Store a value, overwriting any previous entry and restarting its ttl.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl, self.clock.now_utc(), self.clock.now());
        self.inner.insert(key.into(), entry);
    }

    /// Fresh read: the value only if it has not expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let hit = self
            .inner
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());

        metrics::record_cache_read(if hit.is_some() { "fresh" } else { "miss" });
        hit
    }

    /// Fallback read: the value regardless of expiry, flagged when stale.
    pub fn get_stale(&self, key: &str) -> Option<StaleRead<T>> {
        let now = self.clock.now();
        let read = self.inner.get(key).map(|entry| StaleRead {
            value: entry.value.clone(),
            stored_at: entry.stored_at,
            is_stale: entry.is_expired(now),
        });

        let outcome = match &read {
            Some(r) if r.is_stale => "stale",
            Some(_) => "fresh",
            None => "miss",
        };
        metrics::record_cache_read(outcome);
        read
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.inner.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop entries whose age exceeds `max_age`, returning how many went.
    pub fn prune_expired(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.age(now) <= max_age);
        let pruned = before.saturating_sub(self.inner.len());
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned cache entries");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Fresh/expired breakdown for the admin surface.
    pub fn summary(&self) -> CacheSummary {
        let now = self.clock.now();
        let mut summary = CacheSummary::default();
        for entry in self.inner.iter() {
            summary.total += 1;
            if entry.is_expired(now) {
                summary.expired += 1;
            } else {
                summary.fresh += 1;
            }
        }
        summary
    }
}

impl<T: Clone> Default for StaleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
