//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Management HTTP surface.
    pub server: ServerConfig,

    /// Circuit breaker thresholds shared by every upstream.
    pub breaker: BreakerConfig,

    /// Stale-tolerant cache settings.
    pub cache: CacheConfig,

    /// Outbound calls to third-party data providers.
    pub upstream: UpstreamConfig,

    /// Webhook registry and dispatcher settings.
    pub webhooks: WebhookConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoints.
    pub admin: AdminConfig,
}

/// Management server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Per-request timeout for management endpoints in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a trial call.
    pub reset_timeout_secs: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 120,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness window applied when a call site does not pick its own.
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
        }
    }
}

/// Upstream data provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Timeout for a single upstream call in seconds.
    pub request_timeout_secs: u64,

    /// User agent sent to providers.
    pub user_agent: String,
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            user_agent: format!("feed-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Webhook configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Timeout for one delivery in milliseconds.
    pub delivery_timeout_ms: u64,

    /// Failures tolerated before a subscription is deactivated.
    pub max_failure_count: u32,

    /// User agent sent to subscribers.
    pub user_agent: String,

    /// Event types subscribers may register for.
    pub event_types: Vec<String>,

    /// JSON file the registry is snapshotted to. In-memory only when unset.
    pub persistence_path: Option<String>,
}

impl WebhookConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 10_000,
            max_failure_count: 10,
            user_agent: format!("feed-relay-webhooks/{}", env!("CARGO_PKG_VERSION")),
            event_types: default_event_types(),
            persistence_path: None,
        }
    }
}

fn default_event_types() -> Vec<String> {
    [
        "launch.imminent",
        "launch.scheduled",
        "launch.status_changed",
        "news.published",
        "filing.published",
        "market.alert",
        "weather.alert",
        "space_weather.alert",
        "webhook.test",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Output format for log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let raw = r#"
            [breaker]
            failure_threshold = 5

            [webhooks]
            max_failure_count = 3
        "#;
        let config: RelayConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout_secs, 120);
        assert_eq!(config.webhooks.max_failure_count, 3);
        assert_eq!(config.webhooks.delivery_timeout(), Duration::from_secs(10));
        assert!(config.webhooks.event_types.iter().any(|e| e == "launch.imminent"));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_parses_lowercase() {
        let config: RelayConfig = toml::from_str("[observability]\nlog_format = \"json\"").unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
