//! Outbound access to third-party data providers.
//!
//! Feature code fetches through [`UpstreamClient`] inside a guarded call so
//! that provider failures land in the breaker and cache fallback:
//!
//! ```no_run
//! # use feed_relay::upstream::UpstreamClient;
//! # use feed_relay::resilience::GuardedExecutor;
//! # async fn example(exec: GuardedExecutor, client: UpstreamClient) {
//! let launches = exec
//!     .call_default::<serde_json::Value, _, _, _>("launch-library", "launches:upcoming", || {
//!         client.get_json("https://ll.example.com/2.2.0/launch/upcoming/")
//!     })
//!     .await;
//! # }
//! ```

pub mod client;

pub use client::{UpstreamClient, UpstreamError};
