//! Fire-and-forget event fan-out.
//!
//! # Data Flow
//! ```text
//! dispatch(event, payload)            returns immediately with a DispatchHandle
//!     → registry.find_active_for(event)
//!     → envelope serialized once, timestamped once
//!     → one task per subscriber:  sign → POST (deadline) → record success/failure
//!     → join_all                  panics contained per task, logged
//!     → DispatchSummary
//! ```
//!
//! # Design Decisions
//! - Each subscriber delivery is its own task; a hung or panicking endpoint
//!   cannot delay or abort the others
//! - Callers never see delivery errors; the handle is for observation only

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::observability::metrics;
use crate::webhooks::delivery::{DeliveryAttempt, OutgoingDelivery, WebhookSender};
use crate::webhooks::registry::{RegistryError, SubscriptionRegistry};
use crate::webhooks::signing::{self, Envelope};
use crate::webhooks::types::{EventType, Subscription, SubscriptionId};

/// Aggregate result of one dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub dispatch_id: Uuid,
    pub event_type: EventType,
    pub attempts: Vec<DeliveryAttempt>,
    pub succeeded: usize,
    pub failed: usize,
    /// Delivery tasks that panicked and produced no attempt.
    pub panicked: usize,
}

impl DispatchSummary {
    fn empty(dispatch_id: Uuid, event_type: EventType) -> Self {
        Self {
            dispatch_id,
            event_type,
            attempts: Vec::new(),
            succeeded: 0,
            failed: 0,
            panicked: 0,
        }
    }

    pub fn attempt_for(&self, id: SubscriptionId) -> Option<&DeliveryAttempt> {
        self.attempts.iter().find(|a| a.subscription_id == id)
    }
}

/// Handle to a running dispatch.
///
/// Dropping it detaches the dispatch, which keeps running.
#[derive(Debug)]
pub struct DispatchHandle {
    dispatch_id: Uuid,
    event_type: EventType,
    task: JoinHandle<DispatchSummary>,
}

impl DispatchHandle {
    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }

    /// Wait for every delivery of this dispatch to finish.
    pub async fn wait(self) -> DispatchSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(dispatch_id = %self.dispatch_id, error = %e, "Dispatch task failed");
                DispatchSummary::empty(self.dispatch_id, self.event_type)
            }
        }
    }
}

/// Fans events out to subscribed webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<SubscriptionRegistry>,
    sender: WebhookSender,
    clock: SharedClock,
}

impl WebhookDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, sender: WebhookSender, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sender,
                clock,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Deliver `payload` to every active subscriber of `event`.
    ///
    /// Returns without waiting on any network I/O. Must be called from
    /// within a Tokio runtime.
    pub fn dispatch(&self, event: EventType, payload: Value) -> DispatchHandle {
        let dispatch_id = Uuid::new_v4();
        metrics::record_dispatch(event.as_str());

        let inner = Arc::clone(&self.inner);
        let task_event = event.clone();
        let task = tokio::spawn(
            async move {
                let targets = inner.registry.find_active_for(&task_event);
                inner.fan_out(dispatch_id, task_event, payload, targets).await
            }
            .instrument(info_span!("webhook_dispatch", %dispatch_id, event = %event)),
        );

        DispatchHandle {
            dispatch_id,
            event_type: event,
            task,
        }
    }

    /// Deliver to one subscription regardless of its event list.
    pub fn deliver_to(
        &self,
        id: SubscriptionId,
        event: EventType,
        payload: Value,
    ) -> Result<DispatchHandle, RegistryError> {
        let subscription = self.inner.registry.lookup(id).ok_or(RegistryError::NotFound { id })?;
        if !subscription.is_active() {
            return Err(RegistryError::Inactive { id });
        }

        let dispatch_id = Uuid::new_v4();
        metrics::record_dispatch(event.as_str());

        let inner = Arc::clone(&self.inner);
        let task_event = event.clone();
        let task = tokio::spawn(
            async move { inner.fan_out(dispatch_id, task_event, payload, vec![subscription]).await }
                .instrument(info_span!("webhook_dispatch", %dispatch_id, event = %event, subscription_id = %id)),
        );

        Ok(DispatchHandle {
            dispatch_id,
            event_type: event,
            task,
        })
    }
}

/// Await every delivery task, tallying outcomes. A panicked task is counted
/// and logged; it never aborts the others.
async fn collect(summary: &mut DispatchSummary, tasks: Vec<JoinHandle<DeliveryAttempt>>) {
    for result in join_all(tasks).await {
        match result {
            Ok(attempt) => {
                if attempt.outcome.is_success() {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
                summary.attempts.push(attempt);
            }
            Err(e) => {
                summary.panicked += 1;
                tracing::error!(error = %e, "Webhook delivery task panicked");
            }
        }
    }
}

impl Inner {
    async fn fan_out(
        self: Arc<Self>,
        dispatch_id: Uuid,
        event: EventType,
        payload: Value,
        targets: Vec<Arc<Subscription>>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::empty(dispatch_id, event.clone());
        if targets.is_empty() {
            tracing::debug!("No active subscribers");
            return summary;
        }

        let envelope = Envelope::new(event.as_str(), self.clock.now_utc(), payload);
        let body: Arc<[u8]> = match envelope.to_bytes() {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize webhook payload");
                return summary;
            }
        };
        let timestamp: Arc<str> = envelope.timestamp.into();

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|subscription| {
                let inner = Arc::clone(&self);
                let event = event.clone();
                let body = Arc::clone(&body);
                let timestamp = Arc::clone(&timestamp);
                let span = info_span!("webhook_delivery", subscription_id = %subscription.id);
                tokio::spawn(
                    async move { inner.deliver(&subscription, &event, &body, &timestamp).await }.instrument(span),
                )
            })
            .collect();

        collect(&mut summary, tasks).await;

        tracing::info!(
            subscribers = summary.attempts.len() + summary.panicked,
            succeeded = summary.succeeded,
            failed = summary.failed,
            panicked = summary.panicked,
            "Dispatch complete"
        );
        summary
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        event: &EventType,
        body: &[u8],
        timestamp: &str,
    ) -> DeliveryAttempt {
        let delivery_id = Uuid::new_v4();
        let signature = signing::sign(body, subscription.secret());
        let started = Instant::now();

        let outcome = self
            .sender
            .send(OutgoingDelivery {
                delivery_id,
                url: &subscription.url,
                event,
                timestamp,
                signature: &signature,
                body: body.to_vec(),
            })
            .await;

        let elapsed = started.elapsed();
        metrics::record_delivery(outcome.label(), elapsed);

        let deactivated = if outcome.is_success() {
            self.registry.record_success(subscription);
            tracing::debug!(%delivery_id, url = %subscription.url, outcome = ?outcome, "Webhook delivered");
            false
        } else {
            tracing::warn!(
                %delivery_id,
                url = %subscription.url,
                outcome = ?outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "Webhook delivery failed"
            );
            self.registry.record_failure(subscription)
        };

        DeliveryAttempt {
            subscription_id: subscription.id,
            delivery_id,
            event_type: event.clone(),
            signature,
            timestamp: timestamp.to_string(),
            outcome,
            duration_ms: elapsed.as_millis() as u64,
            deactivated,
        }
    }
}
