//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use feed_relay::clock::{SharedClock, TestClock};
use feed_relay::config::RelayConfig;
use feed_relay::lifecycle::Relay;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Defaults tightened for tests: short delivery timeout, admin enabled,
/// metrics off.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.server.bind_address = "127.0.0.1:0".into();
    config.webhooks.delivery_timeout_ms = 500;
    config.upstream.request_timeout_secs = 2;
    config.breaker.failure_threshold = 3;
    config.breaker.reset_timeout_secs = 120;
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config
}

/// Relay wired to a manually advanced clock.
pub fn relay_with_clock(config: RelayConfig) -> (Relay, TestClock) {
    let clock = TestClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let relay = Relay::with_clock(config, shared).expect("relay builds from test config");
    (relay, clock)
}

/// Webhook receiver answering every POST with `status`.
pub async fn subscriber(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// Webhook receiver that accepts but answers only after `delay`.
pub async fn hanging_subscriber(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(&server)
        .await;
    server
}

pub async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}
