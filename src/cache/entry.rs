//! Cache entry and read result types.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stored value with its freshness window.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub value: T,
    /// Wall-clock time of the write, reported to callers.
    pub stored_at: DateTime<Utc>,
    /// Monotonic time of the write, used for expiry.
    pub(crate) stored_instant: Instant,
    /// Freshness window.
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(value: T, ttl: Duration, stored_at: DateTime<Utc>, stored_instant: Instant) -> Self {
        Self {
            value,
            stored_at,
            stored_instant,
            ttl,
        }
    }

    /// Age of the entry relative to `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_instant)
    }

    /// True once the entry is older than its ttl.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.ttl
    }
}

/// Result of a read that tolerates expired data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleRead<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    /// Whether the freshness window had already passed.
    pub is_stale: bool,
}

/// Counts of fresh and expired entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub total: usize,
    pub fresh: usize,
    pub expired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strictly_after_ttl() {
        let start = Instant::now();
        let entry = CacheEntry::new(1u32, Duration::from_secs(10), Utc::now(), start);

        assert!(!entry.is_expired(start + Duration::from_secs(10)));
        assert!(entry.is_expired(start + Duration::from_secs(11)));
    }
}
