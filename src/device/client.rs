//! Device backend client
//!
//! Thin wrapper over the backend's five endpoints. Every public call absorbs
//! failures: `probe` answers a bool, `fetch_state` falls back to a
//! conservative state, writes answer a `CommandResult`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Response};
use url::Url;

use crate::config::DeviceConfig;
use crate::error::SyncError;
use crate::models::{ApiResponse, ApiStatus, CommandResult, DeviceState, PendingCommand};

// ============================================================================
// Endpoints
// ============================================================================

/// Backend endpoints of the device contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    GetStatus,
    SendCommand,
    UpdateStatus,
    GetCommand,
    Test,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::GetStatus => "get_status",
            Endpoint::SendCommand => "send_command",
            Endpoint::UpdateStatus => "update_status",
            Endpoint::GetCommand => "get_command",
            Endpoint::Test => "test",
        }
    }

    /// Path segment with the configured extension, e.g. `get_status.php`
    pub fn file_name(&self, extension: &str) -> String {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() {
            self.name().to_string()
        } else {
            format!("{}.{}", self.name(), extension)
        }
    }
}

// ============================================================================
// Device Client
// ============================================================================

pub struct DeviceClient {
    http_client: Client,
    base_url: Url,
    extension: String,
    probe_timeout: Duration,
    fallback: BTreeMap<String, String>,
}

impl DeviceClient {
    pub fn new(config: &DeviceConfig) -> Result<Self, SyncError> {
        // Trailing slash so joins append instead of replacing the last segment
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)?;

        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout().min(Duration::from_secs(5)))
            .build()
            .map_err(SyncError::Network)?;

        Ok(Self {
            http_client,
            base_url,
            extension: config.endpoint_extension.clone(),
            probe_timeout: config.probe_timeout(),
            fallback: config.fallback.clone(),
        })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, SyncError> {
        Ok(self.base_url.join(&endpoint.file_name(&self.extension))?)
    }

    /// Conservative state reported when the device cannot be read
    pub fn fallback_state(&self) -> DeviceState {
        DeviceState::fallback(&self.fallback)
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Liveness check. True only for a 2xx answer carrying `status: success`.
    pub async fn probe(&self) -> bool {
        match self.try_probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("[DeviceClient] Probe failed: {}", e);
                false
            }
        }
    }

    pub async fn try_probe(&self) -> Result<(), SyncError> {
        let url = self.endpoint_url(Endpoint::Test)?;
        let request = self
            .http_client
            .get(url)
            .query(&[("action", "test")])
            .timeout(self.probe_timeout)
            .send();

        // The per-request timeout covers the body read only once headers arrive
        let body = tokio::time::timeout(self.probe_timeout, async {
            let resp = Self::check_status(request.await?)?;
            resp.json::<ApiResponse>().await.map_err(SyncError::from)
        })
        .await
        .map_err(|_| SyncError::Timeout)??;

        match body.status {
            ApiStatus::Success => Ok(()),
            ApiStatus::Error => Err(SyncError::Logical(body.message)),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read the device's reported state, falling back to the conservative state on any failure
    pub async fn fetch_state(&self, device_id: &str) -> DeviceState {
        match self.try_fetch_state(device_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    "[DeviceClient] Status fetch for {} failed, using fallback: {}",
                    device_id,
                    e
                );
                self.fallback_state()
            }
        }
    }

    pub async fn try_fetch_state(&self, device_id: &str) -> Result<DeviceState, SyncError> {
        let url = self.endpoint_url(Endpoint::GetStatus)?;
        let resp = self
            .http_client
            .get(url)
            .query(&[("device_id", device_id)])
            .send()
            .await?;

        let body: serde_json::Value = Self::check_status(resp)?.json().await?;

        // Backends answer unknown devices with an error envelope instead of a map
        if let Some(status) = body.get("status").and_then(|v| v.as_str()) {
            if status == "error" {
                let message = body
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("device backend reported an error");
                return Err(SyncError::Logical(message.to_string()));
            }
        }

        let state: DeviceState = serde_json::from_value(body)
            .map_err(|e| SyncError::Protocol(format!("malformed device state: {}", e)))?;

        // No readings at all is as good as no answer
        if state.is_empty() {
            return Err(SyncError::Protocol("empty device state".to_string()));
        }
        Ok(state)
    }

    /// Commands queued for the device. Failures and non-array bodies yield an empty list.
    pub async fn get_commands(&self, device_id: &str) -> Vec<PendingCommand> {
        match self.try_get_commands(device_id).await {
            Ok(commands) => commands,
            Err(e) => {
                tracing::warn!("[DeviceClient] Command fetch for {} failed: {}", device_id, e);
                Vec::new()
            }
        }
    }

    async fn try_get_commands(&self, device_id: &str) -> Result<Vec<PendingCommand>, SyncError> {
        let url = self.endpoint_url(Endpoint::GetCommand)?;
        let resp = self
            .http_client
            .get(url)
            .query(&[("device_id", device_id)])
            .send()
            .await?;

        let body: serde_json::Value = Self::check_status(resp)?.json().await?;
        let Some(entries) = body.as_array() else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(cmd) => Some(cmd),
                Err(e) => {
                    tracing::debug!("[DeviceClient] Skipping pending command {}: {}", entry, e);
                    None
                }
            })
            .collect())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Dispatch a command once. No retry; the caller decides what to do with `ok = false`.
    pub async fn send_command(&self, device_id: &str, command: &str) -> CommandResult {
        let result = self
            .post_form(
                Endpoint::SendCommand,
                &[("device_id", device_id), ("command", command)],
            )
            .await;
        Self::into_result(result, "Failed to send command")
    }

    /// Report a sensor value (the direction the device itself uses)
    pub async fn update_status(&self, device_id: &str, sensor_name: &str, value: &str) -> CommandResult {
        let result = self
            .post_form(
                Endpoint::UpdateStatus,
                &[
                    ("device_id", device_id),
                    ("sensor_name", sensor_name),
                    ("value", value),
                ],
            )
            .await;
        Self::into_result(result, "Failed to update status")
    }

    async fn post_form(&self, endpoint: Endpoint, form: &[(&str, &str)]) -> Result<String, SyncError> {
        let url = self.endpoint_url(endpoint)?;
        let resp = self.http_client.post(url).form(form).send().await?;
        let body: ApiResponse = Self::check_status(resp)?.json().await?;

        match body.status {
            ApiStatus::Success => Ok(body.message),
            ApiStatus::Error => Err(SyncError::Logical(body.message)),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn check_status(resp: Response) -> Result<Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(SyncError::Protocol(format!("HTTP status {}", status.as_u16())))
        }
    }

    fn into_result(result: Result<String, SyncError>, context: &str) -> CommandResult {
        match result {
            Ok(message) => CommandResult::ok(message),
            // Server-supplied reason is passed through untouched
            Err(SyncError::Logical(message)) => CommandResult::failed(message),
            Err(e) => {
                tracing::warn!("[DeviceClient] {}: {}", context, e);
                CommandResult::failed(format!("{}: {}", context, e))
            }
        }
    }
}
