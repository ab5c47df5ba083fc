//! Stale-tolerant cache.
//!
//! # Data Flow
//! ```text
//! Guarded call succeeds  → store.rs set(key, value, ttl)
//! Normal read path       → get(key)        (fresh only)
//! Guarded call fails     → get_stale(key)  (any age, flagged is_stale)
//! ```
//!
//! # Design Decisions
//! - Expired entries stay resident so the fallback path has something to serve
//! - Staleness is a property of the read, not of the entry
//! - Expiry uses monotonic time; stored_at is wall-clock for display

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, CacheSummary, StaleRead};
pub use store::StaleCache;
