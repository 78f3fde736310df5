//! API module - HTTP handlers and routes for the UI layer

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::assistant::ResponseProvider;
use crate::device::SyncHandle;
use crate::notify::ToastNotifier;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sync: SyncHandle,
    pub notifier: Arc<ToastNotifier>,
    pub assistant: Arc<dyn ResponseProvider>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Device
        .route("/api/device/state", get(handlers::get_device_state))
        .route("/api/device/live", get(handlers::get_live_state))
        .route("/api/device/connection", get(handlers::get_connection))
        .route("/api/device/command", post(handlers::send_device_command))
        .route("/api/device/refresh", post(handlers::refresh_device))
        // Security
        .route("/api/security", get(handlers::get_security))
        .route("/api/security/night_mode", post(handlers::set_night_mode))
        // Notifications
        .route("/api/notifications", get(handlers::list_notifications))
        // Assistant
        .route("/api/assistant/friendly/tip", get(handlers::get_wellness_tip))
        .route("/api/assistant/:mode", post(handlers::assistant_reply))
}
