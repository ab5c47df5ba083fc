//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream read:
//!     → guarded.rs (three-tier policy, one implementation for every call site)
//!     → circuit_breaker.rs (per-upstream admission, failure accounting)
//!     → timeouts.rs (deadline on the operation itself)
//!     → cache (refresh on success, stale read on failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries inside the breaker; callers own retry policy
//! - Circuit breaker prevents cascading failures
//! - Upstream unavailability degrades responses, never fails requests

pub mod circuit_breaker;
pub mod guarded;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, BreakerRegistry, CallPermit, CircuitSnapshot, CircuitStatus};
pub use guarded::{GuardError, Guarded, GuardedExecutor, Source};
pub use timeouts::{with_timeout, TimeoutError};
