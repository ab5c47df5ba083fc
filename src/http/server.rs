//! Management HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (tracing, request timeout)
//! - Mount the admin router behind bearer auth when enabled
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::{AdminConfig, ServerConfig};
use crate::http::handlers;
use crate::resilience::GuardedExecutor;
use crate::webhooks::{SubscriptionRegistry, WebhookDispatcher};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: GuardedExecutor,
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: WebhookDispatcher,
    pub admin: Arc<AdminConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(executor: GuardedExecutor, dispatcher: WebhookDispatcher, admin: AdminConfig) -> Self {
        Self {
            executor,
            registry: Arc::clone(dispatcher.registry()),
            dispatcher,
            admin: Arc::new(admin),
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the management surface.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        Self {
            router: build_router(config, state),
        }
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks", post(handlers::register_webhook).get(handlers::list_webhooks))
        .route(
            "/webhooks/{id}",
            get(handlers::get_webhook).delete(handlers::deactivate_webhook),
        )
        .route("/webhooks/{id}/test", post(handlers::test_webhook))
        .with_state(state.clone());

    if state.admin.enabled {
        router = router.merge(setup_admin_router(state));
    }

    router
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}
