//! Guarded upstream calls with cache fallback.
//!
//! # Data Flow
//! ```text
//! call(upstream, cache_key, ttl, operation)
//!     → circuit_breaker.rs execute (timeout, failure accounting)
//!     → Ok:  cache.set(cache_key)        → source = live
//!     → Err: cache.get_stale(cache_key)  → source = cache (cached, cachedAt, stale)
//!            miss                        → source = fallback (no data, warning)
//! ```
//!
//! # Design Decisions
//! - Never returns an error: upstream trouble becomes a degraded response
//! - Callers that cannot render without data use `into_data`, which yields
//!   a typed `Unavailable` instead of a raw upstream error
//! - Cache holds JSON values so one cache serves every feature's types

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::cache::StaleCache;
use crate::config::{CacheConfig, UpstreamConfig};
use crate::resilience::circuit_breaker::BreakerRegistry;

/// Where the data in a [`Guarded`] response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Live,
    Cache,
    Fallback,
}

/// Structural unavailability: the upstream failed and nothing was cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("{upstream} is temporarily unavailable")]
    Unavailable { upstream: String },
}

/// Result of a guarded call.
///
/// Serializes as the data's own fields plus provenance:
/// `{ ...data, source, cached?, cachedAt?, stale?, warning? }`.
/// Data that is not a JSON object (lists, scalars) goes under `data` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub data: Option<T>,
    pub source: Source,
    pub cached: Option<bool>,
    pub cached_at: Option<DateTime<Utc>>,
    pub stale: Option<bool>,
    pub warning: Option<String>,
    pub upstream: String,
}

impl<T: Serialize> Serialize for Guarded<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self
            .data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(S::Error::custom)?;

        let mut map = serializer.serialize_map(None)?;
        match data {
            Some(Value::Object(fields)) => {
                for (key, value) in &fields {
                    map.serialize_entry(key, value)?;
                }
            }
            Some(other) => map.serialize_entry("data", &other)?,
            None => {}
        }
        map.serialize_entry("source", &self.source)?;
        if let Some(cached) = self.cached {
            map.serialize_entry("cached", &cached)?;
        }
        if let Some(cached_at) = &self.cached_at {
            map.serialize_entry("cachedAt", cached_at)?;
        }
        if let Some(stale) = self.stale {
            map.serialize_entry("stale", &stale)?;
        }
        if let Some(warning) = &self.warning {
            map.serialize_entry("warning", warning)?;
        }
        map.end()
    }
}

impl<T> Guarded<T> {
    fn live(upstream: &str, data: T) -> Self {
        Self {
            data: Some(data),
            source: Source::Live,
            cached: None,
            cached_at: None,
            stale: None,
            warning: None,
            upstream: upstream.to_string(),
        }
    }

    fn cached(upstream: &str, data: T, stored_at: DateTime<Utc>, is_stale: bool) -> Self {
        let warning = if is_stale {
            format!("{upstream} is unavailable; showing data last updated {}", stored_at.to_rfc3339())
        } else {
            format!("{upstream} is unavailable; showing recently cached data")
        };
        Self {
            data: Some(data),
            source: Source::Cache,
            cached: Some(true),
            cached_at: Some(stored_at),
            stale: Some(is_stale),
            warning: Some(warning),
            upstream: upstream.to_string(),
        }
    }

    fn fallback(upstream: &str) -> Self {
        Self {
            data: None,
            source: Source::Fallback,
            cached: Some(false),
            cached_at: None,
            stale: None,
            warning: Some(format!("{upstream} is temporarily unavailable")),
            upstream: upstream.to_string(),
        }
    }

    /// True unless the data came straight from the upstream.
    pub fn is_degraded(&self) -> bool {
        self.source != Source::Live
    }

    /// The data, or `Unavailable` when only the structural fallback exists.
    pub fn into_data(self) -> Result<T, GuardError> {
        self.data.ok_or(GuardError::Unavailable {
            upstream: self.upstream,
        })
    }

    /// Keep the provenance but reject the structural fallback.
    pub fn require(self) -> Result<Self, GuardError> {
        if self.data.is_some() {
            Ok(self)
        } else {
            Err(GuardError::Unavailable {
                upstream: self.upstream,
            })
        }
    }
}

/// Runs upstream reads through the breaker and the stale cache.
#[derive(Clone)]
pub struct GuardedExecutor {
    breakers: BreakerRegistry,
    cache: StaleCache<Value>,
    call_timeout: Duration,
    default_ttl: Duration,
}

impl GuardedExecutor {
    pub fn new(
        breakers: BreakerRegistry,
        cache: StaleCache<Value>,
        upstream: &UpstreamConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            breakers,
            cache,
            call_timeout: upstream.request_timeout(),
            default_ttl: cache_config.default_ttl(),
        }
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &StaleCache<Value> {
        &self.cache
    }

    /// Guarded call using the configured default ttl.
    pub async fn call_default<T, E, F, Fut>(&self, upstream: &str, cache_key: &str, operation: F) -> Guarded<T>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call(upstream, cache_key, self.default_ttl, operation).await
    }

    /// Live → stale cache → structural fallback.
    pub async fn call<T, E, F, Fut>(
        &self,
        upstream: &str,
        cache_key: &str,
        ttl: Duration,
        operation: F,
    ) -> Guarded<T>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let error = match self.breakers.execute(upstream, self.call_timeout, operation).await {
            Ok(value) => {
                match serde_json::to_value(&value) {
                    Ok(json) => self.cache.set(cache_key, json, ttl),
                    Err(e) => tracing::warn!(
                        upstream = %upstream,
                        cache_key = %cache_key,
                        error = %e,
                        "Live result not cacheable"
                    ),
                }
                return Guarded::live(upstream, value);
            }
            Err(e) => e,
        };

        if !error.is_short_circuit() {
            tracing::warn!(upstream = %upstream, error = %error, "Upstream call failed, falling back");
        }

        if let Some(read) = self.cache.get_stale(cache_key) {
            match serde_json::from_value::<T>(read.value) {
                Ok(data) => {
                    tracing::debug!(
                        upstream = %upstream,
                        cache_key = %cache_key,
                        stale = read.is_stale,
                        "Serving cached value"
                    );
                    return Guarded::cached(upstream, data, read.stored_at, read.is_stale);
                }
                Err(e) => tracing::warn!(
                    upstream = %upstream,
                    cache_key = %cache_key,
                    error = %e,
                    "Cached value does not match requested type"
                ),
            }
        }

        tracing::warn!(upstream = %upstream, cache_key = %cache_key, "No cached value, serving fallback");
        Guarded::fallback(upstream)
    }
}
