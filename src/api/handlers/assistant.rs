//! Assistant handlers

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::assistant::CompanionMode;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AssistantRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AssistantReply {
    pub mode: CompanionMode,
    pub provider: String,
    pub reply: String,
}

/// POST /api/assistant/:mode - Reply to a message in study or friendly mode
pub async fn assistant_reply(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    Json(payload): Json<AssistantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mode = CompanionMode::parse(&mode)
        .ok_or_else(|| AppError::NotFound(format!("Assistant mode {} not found", mode)))?;

    if payload.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    let reply = state.assistant.respond(mode, &payload.message).await;
    Ok(Json(AssistantReply {
        mode,
        provider: state.assistant.name().to_string(),
        reply,
    }))
}

/// GET /api/assistant/friendly/tip - A wellness tip
pub async fn get_wellness_tip(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "tip": state.assistant.wellness_tip().await }))
}
