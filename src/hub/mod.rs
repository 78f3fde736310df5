//! In-memory device hub
//!
//! Serves the backend side of the device contract: the phone reads state and
//! queues commands, the microcontroller reports sensor values and drains its
//! command queue. Nothing is persisted.

mod simulator;

pub use self::simulator::DeviceSimulator;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::device::Endpoint;
use crate::models::{ApiResponse, DeviceState, PendingCommand, SensorReading};

#[derive(Debug, Default)]
struct DeviceRecord {
    sensors: DeviceState,
    pending: Vec<PendingCommand>,
}

/// Shared hub state: device id → record
#[derive(Clone, Default)]
pub struct HubState {
    devices: Arc<RwLock<HashMap<String, DeviceRecord>>>,
}

impl HubState {
    /// Upsert a sensor value stamped with the current time
    pub async fn report(&self, device_id: &str, sensor_name: &str, value: &str) {
        let mut devices = self.devices.write().await;
        let record = devices.entry(device_id.to_string()).or_default();
        record.sensors.insert(
            sensor_name,
            SensorReading::new(value, Utc::now().to_rfc3339()),
        );
    }

    pub async fn state(&self, device_id: &str) -> DeviceState {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .map(|record| record.sensors.clone())
            .unwrap_or_default()
    }

    pub async fn enqueue(&self, device_id: &str, command: &str) -> PendingCommand {
        let pending = PendingCommand {
            id: Uuid::new_v4().to_string(),
            command: command.to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
        };
        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.to_string())
            .or_default()
            .pending
            .push(pending.clone());
        pending
    }

    /// Hand over and clear the device's queue
    pub async fn drain(&self, device_id: &str) -> Vec<PendingCommand> {
        let mut devices = self.devices.write().await;
        devices
            .get_mut(device_id)
            .map(|record| std::mem::take(&mut record.pending))
            .unwrap_or_default()
    }
}

/// Hub routes under `/api`, file names carrying `extension` (e.g. `get_status.php`)
pub fn routes(extension: &str) -> Router<HubState> {
    let path = |endpoint: Endpoint| format!("/api/{}", endpoint.file_name(extension));

    Router::new()
        .route(&path(Endpoint::GetStatus), get(get_status))
        .route(&path(Endpoint::SendCommand), post(send_command))
        .route(&path(Endpoint::UpdateStatus), post(update_status))
        .route(&path(Endpoint::GetCommand), get(get_command))
        .route(&path(Endpoint::Test), get(test))
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandForm {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub sensor_name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TestQuery {
    pub action: Option<String>,
}

/// GET get_status?device_id= - Reported sensors (empty object for unknown devices)
async fn get_status(State(hub): State<HubState>, Query(query): Query<DeviceQuery>) -> impl IntoResponse {
    Json(hub.state(&query.device_id).await)
}

/// POST send_command - Queue a command for the device
async fn send_command(State(hub): State<HubState>, Form(form): Form<CommandForm>) -> impl IntoResponse {
    if form.device_id.trim().is_empty() || form.command.trim().is_empty() {
        return Json(ApiResponse::error("Missing device_id or command"));
    }

    let pending = hub.enqueue(&form.device_id, &form.command).await;
    tracing::info!(
        "[DeviceHub] Queued {} for {} ({})",
        pending.command,
        form.device_id,
        pending.id
    );
    Json(ApiResponse::success("Command queued"))
}

/// POST update_status - Device reports a sensor value
async fn update_status(State(hub): State<HubState>, Form(form): Form<StatusForm>) -> impl IntoResponse {
    if form.device_id.trim().is_empty() || form.sensor_name.trim().is_empty() {
        return Json(ApiResponse::error("Missing device_id or sensor_name"));
    }

    hub.report(&form.device_id, &form.sensor_name, &form.value).await;
    tracing::debug!(
        "[DeviceHub] {} reported {}={}",
        form.device_id,
        form.sensor_name,
        form.value
    );
    Json(ApiResponse::success("Status updated"))
}

/// GET get_command?device_id= - Pending commands, drained on read
async fn get_command(State(hub): State<HubState>, Query(query): Query<DeviceQuery>) -> impl IntoResponse {
    Json(hub.drain(&query.device_id).await)
}

/// GET test?action=test - Liveness
async fn test(Query(query): Query<TestQuery>) -> impl IntoResponse {
    match query.action.as_deref() {
        Some("test") => Json(ApiResponse::success("API is working")),
        _ => Json(ApiResponse::error("Unknown action")),
    }
}
