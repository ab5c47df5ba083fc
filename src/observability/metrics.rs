//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_upstream_calls_total` (counter): guarded calls by upstream, outcome
//! - `relay_circuit_transitions_total` (counter): breaker transitions by upstream, target state
//! - `relay_cache_reads_total` (counter): fresh / stale / miss reads
//! - `relay_dispatches_total` (counter): dispatched events by type
//! - `relay_webhook_deliveries_total` (counter): delivery outcomes
//! - `relay_webhook_delivery_duration_seconds` (histogram): delivery latency
//! - `relay_webhook_deactivations_total` (counter): subscriptions switched off
//! - `relay_active_subscriptions` (gauge): active subscription count
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder (tests, CLI) every call is a no-op
//! - Prometheus exporter runs its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_upstream_call(upstream: &str, outcome: &'static str) {
    counter!(
        "relay_upstream_calls_total",
        "upstream" => upstream.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_circuit_transition(upstream: &str, to: &'static str) {
    counter!(
        "relay_circuit_transitions_total",
        "upstream" => upstream.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_cache_read(outcome: &'static str) {
    counter!("relay_cache_reads_total", "outcome" => outcome).increment(1);
}

pub fn record_dispatch(event_type: &str) {
    counter!("relay_dispatches_total", "event" => event_type.to_string()).increment(1);
}

pub fn record_delivery(outcome: &'static str, duration: Duration) {
    counter!("relay_webhook_deliveries_total", "outcome" => outcome).increment(1);
    histogram!("relay_webhook_delivery_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_deactivation() {
    counter!("relay_webhook_deactivations_total").increment(1);
}

pub fn record_active_subscriptions(count: usize) {
    gauge!("relay_active_subscriptions").set(count as f64);
}
