//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    running: bool,
}

/// Public health check endpoint.
///
/// Returns basic service health without authentication. A paused or
/// circuit-broken engine still reports `ok`; `running` tells them apart.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        running: state.control.status().running,
    })
}
