//! Webhook domain types.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Malformed event type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid event type '{0}': expected dot-separated lowercase segments like 'launch.imminent'")]
pub struct InvalidEventType(pub String);

/// Event type identifier such as `launch.imminent`.
///
/// One or more non-empty segments of `[a-z0-9_]` joined by dots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    pub fn parse(raw: &str) -> Result<Self, InvalidEventType> {
        let well_formed = !raw.is_empty()
            && raw.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            });
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidEventType(raw.to_string()))
        }
    }

    /// `webhook.test`, sent by the test-fire endpoint.
    pub fn test_ping() -> Self {
        Self("webhook.test".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventType {
    type Error = InvalidEventType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> Self {
        event.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The event types subscribers may register for.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    known: BTreeSet<EventType>,
}

impl EventCatalog {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, InvalidEventType> {
        let known = names
            .iter()
            .map(|n| EventType::parse(n.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { known })
    }

    /// The catalog entry matching `raw`, if any.
    pub fn lookup(&self, raw: &str) -> Option<&EventType> {
        self.known.iter().find(|e| e.as_str() == raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.known.iter()
    }
}

const NO_DELIVERY: i64 = i64::MIN;

/// Result of recording a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub failure_count: u32,
    /// This failure is the one that switched the subscription off.
    pub deactivated: bool,
}

/// A registered webhook endpoint.
///
/// Immutable registration data plus delivery health kept in atomics, so
/// concurrent deliveries for different events never lose an update.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub url: Url,
    pub events: BTreeSet<EventType>,
    pub created_at: DateTime<Utc>,
    secret: String,
    is_active: AtomicBool,
    failure_count: AtomicU32,
    last_delivery_ms: AtomicI64,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        url: Url,
        events: BTreeSet<EventType>,
        secret: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            url,
            events,
            created_at,
            secret,
            is_active: AtomicBool::new(true),
            failure_count: AtomicU32::new(0),
            last_delivery_ms: AtomicI64::new(NO_DELIVERY),
        }
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn last_delivery_at(&self) -> Option<DateTime<Utc>> {
        match self.last_delivery_ms.load(Ordering::Acquire) {
            NO_DELIVERY => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn listens_to(&self, event: &EventType) -> bool {
        self.events.contains(event)
    }

    /// Soft delete. Returns true if this call changed the state.
    pub(crate) fn deactivate(&self) -> bool {
        self.is_active.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_success(&self, at: DateTime<Utc>) {
        self.failure_count.store(0, Ordering::Release);
        self.last_delivery_ms.store(at.timestamp_millis(), Ordering::Release);
    }

    /// Count a failure; past `max_failures` the subscription goes inactive.
    pub(crate) fn record_failure(&self, max_failures: u32) -> FailureRecord {
        let failure_count = self.failure_count.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let deactivated = failure_count > max_failures && self.deactivate();
        FailureRecord {
            failure_count,
            deactivated,
        }
    }

    pub fn view(&self) -> SubscriptionView {
        SubscriptionView {
            id: self.id,
            url: self.url.to_string(),
            events: self.events.clone(),
            is_active: self.is_active(),
            failure_count: self.failure_count(),
            last_delivery_at: self.last_delivery_at(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn to_stored(&self) -> StoredSubscription {
        StoredSubscription {
            id: self.id,
            url: self.url.clone(),
            events: self.events.clone(),
            secret: self.secret.clone(),
            is_active: self.is_active(),
            failure_count: self.failure_count(),
            last_delivery_at: self.last_delivery_at(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_stored(stored: StoredSubscription) -> Self {
        let sub = Self::new(stored.id, stored.url, stored.events, stored.secret, stored.created_at);
        sub.is_active.store(stored.is_active, Ordering::Release);
        sub.failure_count.store(stored.failure_count, Ordering::Release);
        if let Some(at) = stored.last_delivery_at {
            sub.last_delivery_ms.store(at.timestamp_millis(), Ordering::Release);
        }
        sub
    }
}

/// Read model of a subscription. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub id: SubscriptionId,
    pub url: String,
    pub events: BTreeSet<EventType>,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Returned exactly once, from registration. Carries the signing secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubscription {
    pub id: SubscriptionId,
    pub url: String,
    pub events: BTreeSet<EventType>,
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// On-disk form used by registry persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredSubscription {
    pub id: SubscriptionId,
    pub url: Url,
    pub events: BTreeSet<EventType>,
    pub secret: String,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> Subscription {
        Subscription::new(
            SubscriptionId::new(),
            Url::parse("https://hooks.example.com/in").unwrap(),
            [EventType::parse("launch.imminent").unwrap()].into_iter().collect(),
            "s3cret".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_event_type_parsing() {
        assert!(EventType::parse("launch.imminent").is_ok());
        assert!(EventType::parse("space_weather.alert").is_ok());
        assert!(EventType::parse("heartbeat").is_ok());
        assert!(EventType::parse("").is_err());
        assert!(EventType::parse("Launch.Imminent").is_err());
        assert!(EventType::parse("launch..imminent").is_err());
        assert!(EventType::parse("launch imminent").is_err());
    }

    #[test]
    fn test_event_type_serde_validates() {
        let ok: EventType = serde_json::from_str("\"news.published\"").unwrap();
        assert_eq!(ok.as_str(), "news.published");
        assert!(serde_json::from_str::<EventType>("\"NEWS\"").is_err());
    }

    #[test]
    fn test_failure_threshold_is_exclusive() {
        let sub = subscription();
        for expected in 1..=10 {
            let record = sub.record_failure(10);
            assert_eq!(record.failure_count, expected);
            assert!(!record.deactivated);
            assert!(sub.is_active());
        }

        let record = sub.record_failure(10);
        assert_eq!(record.failure_count, 11);
        assert!(record.deactivated);
        assert!(!sub.is_active());

        assert!(!sub.record_failure(10).deactivated, "only the flipping failure reports deactivation");
    }

    #[test]
    fn test_success_resets_failures() {
        let sub = subscription();
        sub.record_failure(10);
        sub.record_failure(10);
        let at = Utc::now();
        sub.record_success(at);

        assert_eq!(sub.failure_count(), 0);
        assert_eq!(sub.last_delivery_at().unwrap().timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_view_omits_secret() {
        let json = serde_json::to_value(subscription().view()).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(json["isActive"], true);
        assert_eq!(json["events"][0], "launch.imminent");
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let sub = std::sync::Arc::new(subscription());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sub = sub.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        sub.record_failure(u32::MAX);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sub.failure_count(), 1000);
    }
}
