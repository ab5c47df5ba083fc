//! Failure-isolating relay for third-party data feeds.
//!
//! Upstream reads go through a per-upstream circuit breaker and a
//! stale-tolerant cache so a provider outage degrades responses instead of
//! failing them. Events fan out to registered webhook subscribers as signed,
//! fire-and-forget POSTs.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod upstream;
pub mod webhooks;

pub use config::schema::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::{Relay, Shutdown};
