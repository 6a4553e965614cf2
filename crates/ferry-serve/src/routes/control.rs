//! Engine control endpoints.

use axum::Json;
use axum::extract::{Path, State};
use ferry_relay::EngineStatus;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for pause/resume/wake.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    action: &'static str,
    /// Whether the call changed anything (false for a repeated pause, or a
    /// wake with nothing asleep).
    changed: bool,
    running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForceWakeResponse {
    source_id: String,
    forgotten: bool,
}

/// `GET /api/v1/status`
pub async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.control.status())
}

/// `POST /api/v1/pause`
pub async fn pause(State(state): State<AppState>) -> Json<ActionResponse> {
    let changed = state.control.pause();
    Json(ActionResponse {
        action: "pause",
        changed,
        running: state.control.status().running,
    })
}

/// `POST /api/v1/resume`
///
/// Also closes an open circuit breaker.
pub async fn resume(State(state): State<AppState>) -> Json<ActionResponse> {
    let changed = state.control.resume();
    Json(ActionResponse {
        action: "resume",
        changed,
        running: state.control.status().running,
    })
}

/// `POST /api/v1/wake`
pub async fn wake(State(state): State<AppState>) -> Json<ActionResponse> {
    let status = state.control.status();
    state.control.wake();
    Json(ActionResponse {
        action: "wake",
        changed: status.sleeping,
        running: status.running,
    })
}

/// `POST /api/v1/force-wake/{source_id}`
///
/// Forgets the item's mapping and processed marker so the next cycle relays
/// it again, then wakes the engine.
pub async fn force_wake(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Result<Json<ForceWakeResponse>, ApiError> {
    let source_id = source_id.trim().to_string();
    if source_id.is_empty() {
        return Err(ApiError::BadRequest("source_id must not be empty".to_string()));
    }

    let forgotten = state.control.force_wake(&source_id)?;
    tracing::info!(source_id = %source_id, forgotten, "force wake");

    Ok(Json(ForceWakeResponse {
        source_id,
        forgotten,
    }))
}
