//! Single-endpoint webhook POSTs and their outcomes.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::resilience::with_timeout;
use crate::webhooks::signing::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::webhooks::types::{EventType, SubscriptionId};

/// How one delivery ended. Anything but `Success` counts as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success { status: u16 },
    HttpError { status: u16 },
    NetworkError { message: String },
    Timeout,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::HttpError { .. } => "http_error",
            Self::NetworkError { .. } => "network_error",
            Self::Timeout => "timeout",
        }
    }
}

/// Record of one subscriber delivery within a dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub subscription_id: SubscriptionId,
    pub delivery_id: Uuid,
    pub event_type: EventType,
    pub signature: String,
    pub timestamp: String,
    pub outcome: DeliveryOutcome,
    pub duration_ms: u64,
    /// This attempt pushed the subscription past its failure limit.
    pub deactivated: bool,
}

/// A signed request ready to send.
#[derive(Debug, Clone)]
pub struct OutgoingDelivery<'a> {
    pub delivery_id: Uuid,
    pub url: &'a Url,
    pub event: &'a EventType,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("failed to build webhook client: {0}")]
pub struct SenderError(String);

/// POSTs signed payloads with a hard per-delivery deadline.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(config: &WebhookConfig) -> Result<Self, SenderError> {
        let client = reqwest::Client::builder()
            .timeout(config.delivery_timeout())
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SenderError(e.to_string()))?;

        Ok(Self {
            client,
            timeout: config.delivery_timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one delivery. Never errors; every failure mode is an outcome.
    pub async fn send(&self, delivery: OutgoingDelivery<'_>) -> DeliveryOutcome {
        let request = self
            .client
            .post(delivery.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, delivery.event.as_str())
            .header(SIGNATURE_HEADER, delivery.signature)
            .header(TIMESTAMP_HEADER, delivery.timestamp)
            .header(DELIVERY_HEADER, delivery.delivery_id.to_string())
            .body(delivery.body)
            .send();

        match with_timeout(self.timeout, request).await {
            Err(_) => DeliveryOutcome::Timeout,
            Ok(Err(e)) if e.is_timeout() => DeliveryOutcome::Timeout,
            Ok(Err(e)) if e.is_connect() => DeliveryOutcome::NetworkError {
                message: format!("connection failed: {e}"),
            },
            Ok(Err(e)) => DeliveryOutcome::NetworkError { message: e.to_string() },
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    DeliveryOutcome::Success { status }
                } else {
                    DeliveryOutcome::HttpError { status }
                }
            }
        }
    }
}
