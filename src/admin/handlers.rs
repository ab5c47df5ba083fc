use axum::{extract::State, Json};
use serde::Serialize;

use crate::cache::CacheSummary;
use crate::http::server::AppState;
use crate::resilience::{CircuitSnapshot, CircuitStatus};
use crate::webhooks::registry::{summarize, RegistrySummary};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub open_circuits: usize,
    pub subscriptions: RegistrySummary,
    pub cache: CacheSummary,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let circuits = state.executor.breakers().snapshots();
    let open_circuits = circuits.iter().filter(|c| c.status != CircuitStatus::Closed).count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_circuits == 0 { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        open_circuits,
        subscriptions: summarize(&state.registry.list()),
        cache: state.executor.cache().summary(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.executor.breakers().snapshots())
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheSummary> {
    Json(state.executor.cache().summary())
}
