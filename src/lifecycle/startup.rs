//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from validated configuration
//! - Restore persisted subscriptions
//! - Bind the management listener and serve until shutdown
//! - Save the registry on the way out
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in dependency order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::cache::StaleCache;
use crate::clock::{SharedClock, SystemClock};
use crate::config::RelayConfig;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::resilience::{BreakerRegistry, GuardedExecutor};
use crate::upstream::{UpstreamClient, UpstreamError};
use crate::webhooks::delivery::SenderError;
use crate::webhooks::{RegistryError, SubscriptionRegistry, WebhookDispatcher, WebhookSender};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("webhook registry: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sender(#[from] SenderError),

    #[error("upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Every long-lived component, wired together.
///
/// The management server only needs the registry side. `executor`,
/// `dispatcher` and `upstream` are the handles data-fetching feature code
/// embeds this crate through: it fetches with `upstream` inside
/// `executor.call` and publishes changes with `dispatcher.dispatch`.
pub struct Relay {
    pub config: RelayConfig,
    pub executor: GuardedExecutor,
    pub dispatcher: WebhookDispatcher,
    /// Shared provider client for guarded fetches; not used by the server itself.
    pub upstream: UpstreamClient,
}

impl Relay {
    pub fn build(config: RelayConfig) -> Result<Self, StartupError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RelayConfig, clock: SharedClock) -> Result<Self, StartupError> {
        let breakers = BreakerRegistry::with_clock(&config.breaker, clock.clone());
        let cache = StaleCache::with_clock(clock.clone());
        let executor = GuardedExecutor::new(breakers, cache, &config.upstream, &config.cache);

        let registry = Arc::new(SubscriptionRegistry::load_from_file(&config.webhooks, clock.clone())?);
        let sender = WebhookSender::new(&config.webhooks)?;
        let dispatcher = WebhookDispatcher::new(registry, sender, clock);

        let upstream = UpstreamClient::new(&config.upstream)?;

        tracing::info!(
            failure_threshold = config.breaker.failure_threshold,
            reset_timeout_secs = config.breaker.reset_timeout_secs,
            subscriptions = dispatcher.registry().len(),
            "Relay initialized"
        );

        Ok(Self {
            config,
            executor,
            dispatcher,
            upstream,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.executor.clone(), self.dispatcher.clone(), self.config.admin.clone())
    }

    /// Serve the management surface until `shutdown` fires, then persist.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let address = self.config.server.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;

        let server = HttpServer::new(&self.config.server, self.app_state());
        let served = server.run(listener, shutdown.wait()).await;

        if let Err(e) = self.dispatcher.registry().save_to_file() {
            tracing::error!(error = %e, "Failed to save webhook subscriptions on shutdown");
        }

        served.map_err(StartupError::Serve)
    }
}
