//! Liveness endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use parley_delivery::DeliveryStatsSnapshot;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub delivery: DeliveryStatsSnapshot,
    pub narration_cache_size: usize,
    pub connections: usize,
    pub presence_sessions: usize,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        delivery: state.scheduler.stats(),
        narration_cache_size: state.cache.len(),
        connections: state.hub.connection_count(),
        presence_sessions: state.presence.session_count(),
    })
}
