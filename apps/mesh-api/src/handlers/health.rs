//! GET `/health` — liveness plus a best-effort dependency probe. Always
//! `200` while the process is alive; `services` reports what's actually
//! reachable rather than folding a dependency outage into process health.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub store: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_status = match state.store.get("__health_probe__").await {
        Ok(_) => "ok",
        Err(_) => "unreachable",
    };

    Json(HealthResponse {
        status: "ok",
        services: ServiceHealth { store: store_status },
    })
}
