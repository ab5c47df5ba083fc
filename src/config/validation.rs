//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Validate addresses and the event type catalog
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::webhooks::types::EventType;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("breaker.failure_threshold", "must be > 0"));
    }
    if config.breaker.reset_timeout_secs == 0 {
        errors.push(ValidationError::new("breaker.reset_timeout_secs", "must be > 0"));
    }

    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.request_timeout_secs", "must be > 0"));
    }

    if config.webhooks.delivery_timeout_ms == 0 {
        errors.push(ValidationError::new("webhooks.delivery_timeout_ms", "must be > 0"));
    }
    if config.webhooks.event_types.is_empty() {
        errors.push(ValidationError::new("webhooks.event_types", "must list at least one event type"));
    }
    let mut seen = HashSet::new();
    for name in &config.webhooks.event_types {
        if let Err(e) = EventType::parse(name) {
            errors.push(ValidationError::new("webhooks.event_types", e.to_string()));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(
                "webhooks.event_types",
                format!("'{}' listed twice", name),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = RelayConfig::default();
        config.server.bind_address = "not-an-address".into();
        config.breaker.failure_threshold = 0;
        config.webhooks.event_types = vec!["launch.imminent".into(), "Bad Event".into(), "launch.imminent".into()];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();

        assert_eq!(errors.len(), 4);
        assert!(fields.contains(&"server.bind_address"));
        assert!(fields.contains(&"breaker.failure_threshold"));
        assert_eq!(fields.iter().filter(|f| **f == "webhooks.event_types").count(), 2);
    }

    #[test]
    fn test_admin_requires_key() {
        let mut config = RelayConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "  ".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }
}
