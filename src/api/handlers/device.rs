//! Device handlers

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::AppError;
use crate::models::ConnectionStatus;

use super::SuccessResponse;

/// GET /api/device/state - Latest snapshot of the device
pub async fn get_device_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sync.snapshot())
}

/// GET /api/device/live - Read the device now, bypassing the synced snapshot (fallback on failure)
pub async fn get_live_state(State(state): State<AppState>) -> impl IntoResponse {
    let device_id = state.sync.device_id();
    Json(state.sync.client().fetch_state(device_id).await)
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub device_id: String,
    pub status: ConnectionStatus,
    pub connected: bool,
}

/// GET /api/device/connection - Connection status only
pub async fn get_connection(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.sync.status();
    Json(ConnectionResponse {
        device_id: state.sync.device_id().to_string(),
        status,
        connected: status.connected(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// POST /api/device/command - Dispatch a command once
pub async fn send_device_command(
    State(state): State<AppState>,
    Json(payload): Json<CommandRequest>,
) -> Result<impl IntoResponse, AppError> {
    let command = payload.command.trim();
    if command.is_empty() {
        return Err(AppError::BadRequest("command must not be empty".to_string()));
    }

    Ok(Json(state.sync.send_command(command).await))
}

/// POST /api/device/refresh - Poll now instead of waiting for the next tick
pub async fn refresh_device(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if !state.sync.refresh().await {
        return Err(AppError::InternalError("Device sync is not running".to_string()));
    }
    Ok(Json(SuccessResponse::new("Refresh requested")))
}

/// GET /api/notifications - Recent notifications, oldest first
pub async fn list_notifications(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.notifier.recent().await)
}
