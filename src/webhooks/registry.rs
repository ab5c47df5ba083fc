//! Subscription registry.
//!
//! # Responsibilities
//! - Validate and store subscriptions (URL, event types, generated secret)
//! - Answer "who listens to this event" for the dispatcher
//! - Track delivery health and deactivate endpoints that keep failing
//! - Snapshot to a JSON file when a persistence path is configured
//!
//! # Design Decisions
//! - `Arc<Subscription>` handed to delivery tasks; health counters are atomics
//!   on the record, so no lock is held across a delivery
//! - Deactivation is a soft delete; records stay listable
//! - Saves are serialized: one writer owns the temp file at a time, and the
//!   snapshot is taken under the same lock so the newest state lands last

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::clock::{SharedClock, SystemClock};
use crate::config::WebhookConfig;
use crate::observability::metrics;
use crate::webhooks::types::{
    CreatedSubscription, EventCatalog, EventType, InvalidEventType, StoredSubscription, Subscription,
    SubscriptionId, SubscriptionView,
};

const SECRET_BYTES: usize = 32;

/// Registry errors. Validation variants map to HTTP 400.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme '{scheme}', expected http or https")]
    UnsupportedScheme { scheme: String },

    #[error("at least one event type is required")]
    NoEvents,

    #[error("unknown event type '{event}'")]
    UnknownEvent { event: String },

    #[error("subscription {id} not found")]
    NotFound { id: SubscriptionId },

    #[error("subscription {id} is inactive")]
    Inactive { id: SubscriptionId },

    #[error("invalid event catalog: {0}")]
    Catalog(#[from] InvalidEventType),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RegistryError {
    /// True for errors caused by caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. } | Self::UnsupportedScheme { .. } | Self::NoEvents | Self::UnknownEvent { .. }
        )
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// In-memory subscription store.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    catalog: EventCatalog,
    max_failure_count: u32,
    persistence_path: Option<PathBuf>,
    save_lock: Mutex<()>,
    clock: SharedClock,
}

impl SubscriptionRegistry {
    pub fn new(config: &WebhookConfig) -> Result<Self, RegistryError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &WebhookConfig, clock: SharedClock) -> Result<Self, RegistryError> {
        Ok(Self {
            subscriptions: DashMap::new(),
            catalog: EventCatalog::from_names(&config.event_types)?,
            max_failure_count: config.max_failure_count,
            persistence_path: config.persistence_path.as_ref().map(PathBuf::from),
            save_lock: Mutex::new(()),
            clock,
        })
    }

    /// Build a registry and restore the snapshot at the persistence path, if any.
    pub fn load_from_file(config: &WebhookConfig, clock: SharedClock) -> Result<Self, RegistryError> {
        let registry = Self::with_clock(config, clock)?;
        if let Some(path) = registry.persistence_path.as_deref() {
            if path.exists() {
                let reader = BufReader::new(File::open(path)?);
                let stored: Vec<StoredSubscription> = serde_json::from_reader(reader)?;
                for record in stored {
                    registry
                        .subscriptions
                        .insert(record.id, Arc::new(Subscription::from_stored(record)));
                }
                tracing::info!(
                    path = %path.display(),
                    count = registry.subscriptions.len(),
                    "Loaded webhook subscriptions"
                );
            }
        }
        metrics::record_active_subscriptions(registry.active_count());
        Ok(registry)
    }

    /// Write the current snapshot. No-op without a persistence path.
    pub fn save_to_file(&self) -> Result<(), RegistryError> {
        let Some(path) = self.persistence_path.as_deref() else {
            return Ok(());
        };

        // Guards no data, so a poisoned lock is still usable.
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stored: Vec<StoredSubscription> = self.subscriptions.iter().map(|r| r.value().to_stored()).collect();
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = temp_path(path);
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &stored)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), count = stored.len(), "Saved webhook subscriptions");
        Ok(())
    }

    /// Validate and store a new active subscription.
    pub fn register<S: AsRef<str>>(&self, url: &str, events: &[S]) -> Result<CreatedSubscription, RegistryError> {
        let url = validate_url(url)?;
        let events = self.validate_events(events)?;

        let subscription = Subscription::new(
            SubscriptionId::new(),
            url,
            events,
            generate_secret(),
            self.clock.now_utc(),
        );
        let created = CreatedSubscription {
            id: subscription.id,
            url: subscription.url.to_string(),
            events: subscription.events.clone(),
            secret: subscription.secret().to_string(),
            is_active: true,
            created_at: subscription.created_at,
        };

        self.subscriptions.insert(subscription.id, Arc::new(subscription));
        tracing::info!(
            subscription_id = %created.id,
            url = %created.url,
            events = ?created.events,
            "Webhook subscription registered"
        );
        self.persist();
        metrics::record_active_subscriptions(self.active_count());

        Ok(created)
    }

    /// All subscriptions, oldest first.
    pub fn list(&self) -> Vec<SubscriptionView> {
        let mut views: Vec<SubscriptionView> = self.subscriptions.iter().map(|r| r.value().view()).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        views
    }

    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionView> {
        self.subscriptions.get(&id).map(|r| r.value().view())
    }

    pub(crate) fn lookup(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Soft delete. Deactivating an inactive subscription succeeds.
    pub fn deactivate(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        let subscription = self.lookup(id).ok_or(RegistryError::NotFound { id })?;
        if subscription.deactivate() {
            tracing::info!(subscription_id = %id, "Webhook subscription deactivated");
            self.persist();
            metrics::record_active_subscriptions(self.active_count());
        }
        Ok(())
    }

    /// Active subscriptions listening to `event`.
    pub fn find_active_for(&self, event: &EventType) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|r| r.value().is_active() && r.value().listens_to(event))
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub fn record_success(&self, subscription: &Subscription) {
        subscription.record_success(self.clock.now_utc());
    }

    /// Count a failed delivery. Returns true if this failure deactivated the subscription.
    pub fn record_failure(&self, subscription: &Subscription) -> bool {
        let record = subscription.record_failure(self.max_failure_count);
        if record.deactivated {
            tracing::warn!(
                subscription_id = %subscription.id,
                url = %subscription.url,
                failure_count = record.failure_count,
                "Webhook subscription deactivated after repeated failures"
            );
            metrics::record_deactivation();
            metrics::record_active_subscriptions(self.active_count());
            self.persist();
        }
        record.deactivated
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.iter().filter(|r| r.value().is_active()).count()
    }

    fn validate_events<S: AsRef<str>>(&self, events: &[S]) -> Result<BTreeSet<EventType>, RegistryError> {
        if events.is_empty() {
            return Err(RegistryError::NoEvents);
        }
        events
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                self.catalog
                    .lookup(raw)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownEvent { event: raw.to_string() })
            })
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = self.save_to_file() {
            tracing::error!(error = %e, "Failed to persist webhook subscriptions");
        }
    }
}

fn validate_url(raw: &str) -> Result<Url, RegistryError> {
    let url = Url::parse(raw).map_err(|e| RegistryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RegistryError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(url)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Subscription counts for the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

pub fn summarize(views: &[SubscriptionView]) -> RegistrySummary {
    let active = views.iter().filter(|v| v.is_active).count();
    RegistrySummary {
        total: views.len(),
        active,
        inactive: views.len() - active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TestClock};

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(&WebhookConfig::default()).unwrap()
    }

    #[test]
    fn test_register_returns_secret_once() {
        let reg = registry();
        let created = reg
            .register("https://hooks.example.com/launch", &["launch.imminent", "launch.scheduled"])
            .unwrap();

        assert!(created.is_active);
        assert_eq!(created.secret.len(), SECRET_BYTES * 2);
        assert!(created.secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(created.events.len(), 2);

        let listed = serde_json::to_string(&reg.list()).unwrap();
        assert!(!listed.contains(&created.secret));
    }

    #[test]
    fn test_secrets_are_unique() {
        let reg = registry();
        let a = reg.register("https://a.example.com", &["news.published"]).unwrap();
        let b = reg.register("https://b.example.com", &["news.published"]).unwrap();
        assert_ne!(a.secret, b.secret);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_register_validation() {
        let reg = registry();
        assert!(matches!(
            reg.register("not a url", &["news.published"]),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            reg.register("/relative/path", &["news.published"]),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            reg.register("ftp://files.example.com", &["news.published"]),
            Err(RegistryError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            reg.register("https://x.example.com", &[] as &[&str]),
            Err(RegistryError::NoEvents)
        ));
        let err = reg
            .register("https://x.example.com", &["news.published", "launch.cancelled"])
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownEvent { ref event } if event == "launch.cancelled"));
        assert!(err.is_validation());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_find_active_for_filters_event_and_state() {
        let reg = registry();
        let launch = reg.register("https://a.example.com", &["launch.imminent"]).unwrap();
        let news = reg.register("https://b.example.com", &["news.published"]).unwrap();
        let both = reg
            .register("https://c.example.com", &["launch.imminent", "news.published"])
            .unwrap();

        let event = EventType::parse("launch.imminent").unwrap();
        let mut ids: Vec<_> = reg.find_active_for(&event).iter().map(|s| s.id).collect();
        ids.sort();
        let mut expected = vec![launch.id, both.id];
        expected.sort();
        assert_eq!(ids, expected);

        reg.deactivate(both.id).unwrap();
        let ids: Vec<_> = reg.find_active_for(&event).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![launch.id]);
        assert!(reg
            .find_active_for(&EventType::parse("news.published").unwrap())
            .iter()
            .all(|s| s.id == news.id));
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let reg = registry();
        let created = reg.register("https://a.example.com", &["market.alert"]).unwrap();

        reg.deactivate(created.id).unwrap();
        reg.deactivate(created.id).unwrap();
        assert!(!reg.get(created.id).unwrap().is_active);
        assert_eq!(reg.len(), 1);

        let missing = SubscriptionId::new();
        assert!(matches!(reg.deactivate(missing), Err(RegistryError::NotFound { id }) if id == missing));
    }

    #[test]
    fn test_failure_accounting() {
        let clock = TestClock::new();
        let reg = SubscriptionRegistry::with_clock(&WebhookConfig::default(), Arc::new(clock.clone())).unwrap();
        let created = reg.register("https://a.example.com", &["weather.alert"]).unwrap();
        let sub = reg.lookup(created.id).unwrap();

        for _ in 0..10 {
            assert!(!reg.record_failure(&sub));
        }
        reg.record_success(&sub);
        let view = reg.get(created.id).unwrap();
        assert_eq!(view.failure_count, 0);
        assert_eq!(
            view.last_delivery_at.unwrap().timestamp_millis(),
            clock.now_utc().timestamp_millis()
        );

        for _ in 0..10 {
            reg.record_failure(&sub);
        }
        assert!(reg.record_failure(&sub));
        assert!(!reg.get(created.id).unwrap().is_active);
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let config = WebhookConfig {
            persistence_path: Some(path.to_string_lossy().into_owned()),
            ..WebhookConfig::default()
        };

        let reg = SubscriptionRegistry::load_from_file(&config, Arc::new(SystemClock)).unwrap();
        let kept = reg.register("https://a.example.com/hook", &["filing.published"]).unwrap();
        let dropped = reg.register("https://b.example.com/hook", &["filing.published"]).unwrap();
        reg.deactivate(dropped.id).unwrap();
        assert!(path.exists());

        let restored = SubscriptionRegistry::load_from_file(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.active_count(), 1);
        assert_eq!(restored.lookup(kept.id).unwrap().secret(), kept.secret);
        assert!(!restored.get(dropped.id).unwrap().is_active);
    }

    #[test]
    fn test_concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let config = WebhookConfig {
            persistence_path: Some(path.to_string_lossy().into_owned()),
            ..WebhookConfig::default()
        };
        let reg = SubscriptionRegistry::load_from_file(&config, Arc::new(SystemClock)).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let reg = &reg;
                scope.spawn(move || {
                    for n in 0..25 {
                        let url = format!("https://w{worker}.example.com/{n}");
                        reg.register(&url, &["news.published"]).unwrap();
                        reg.save_to_file().unwrap();
                    }
                });
            }
        });

        assert!(!temp_path(&path).exists());
        let restored = SubscriptionRegistry::load_from_file(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(restored.len(), 200);
    }

    #[test]
    fn test_summarize() {
        let reg = registry();
        let a = reg.register("https://a.example.com", &["news.published"]).unwrap();
        reg.register("https://b.example.com", &["news.published"]).unwrap();
        reg.deactivate(a.id).unwrap();

        let summary = summarize(&reg.list());
        assert_eq!(
            summary,
            RegistrySummary {
                total: 2,
                active: 1,
                inactive: 1
            }
        );
    }
}
