//! Public management handlers: liveness and webhook subscriptions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::webhooks::{CreatedSubscription, DispatchSummary, EventType, SubscriptionId, SubscriptionView};

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Body of `POST /webhooks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub url: String,
    pub events: Vec<String>,
}

pub async fn register_webhook(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<CreatedSubscription>), ApiError> {
    let created = state.registry.register(&request.url, &request.events)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_webhooks(State(state): State<AppState>) -> Json<Vec<SubscriptionView>> {
    Json(state.registry.list())
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionView>, ApiError> {
    let id = SubscriptionId(id);
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("subscription {id} not found")))
}

pub async fn deactivate_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.deactivate(SubscriptionId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Fire a `webhook.test` ping at one subscription and report the outcome.
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let id = SubscriptionId(id);
    let payload = json!({
        "subscriptionId": id,
        "message": "Test delivery from feed-relay",
    });
    let handle = state.dispatcher.deliver_to(id, EventType::test_ping(), payload)?;
    Ok(Json(handle.wait().await))
}
