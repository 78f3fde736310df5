//! Data models for the ASR device sync service

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Device State Models
// ============================================================================

/// A single reported sensor/actuator value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: String,
    pub timestamp: String,
}

impl SensorReading {
    pub fn new(value: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Parse the reported timestamp (RFC 3339 or MySQL-style `YYYY-MM-DD HH:MM:SS` in UTC)
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Reported device state: sensor name → reading. Keys are whatever the device reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceState(BTreeMap<String, SensorReading>);

impl DeviceState {
    /// Build the conservative fallback state: every known key at its default value
    pub fn fallback(defaults: &BTreeMap<String, String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self(
            defaults
                .iter()
                .map(|(name, value)| (name.clone(), SensorReading::new(value.clone(), now.clone())))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&SensorReading> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, reading: SensorReading) {
        self.0.insert(name.into(), reading);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys whose timestamp went backwards compared to `previous`.
    ///
    /// These readings are stale; the snapshot still replaces the previous one
    /// wholesale and the UI layer decides to ignore them.
    pub fn stale_keys(&self, previous: &DeviceState) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|(name, reading)| {
                let prev = previous.get(name)?;
                let (Some(now), Some(before)) =
                    (reading.parsed_timestamp(), prev.parsed_timestamp())
                else {
                    return None;
                };
                (now < before).then(|| name.clone())
            })
            .collect()
    }
}

impl FromIterator<(String, SensorReading)> for DeviceState {
    fn from_iter<T: IntoIterator<Item = (String, SensorReading)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Wire Response Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

/// `{status, message}` body returned by the write endpoints and the liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            message: message.into(),
        }
    }
}

/// Outcome of a write request as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Command waiting on the backend for the device to pick up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ============================================================================
// Connection / Snapshot Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Unknown,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised while night mode is on and the door reads `OPEN`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityAlert {
    pub sensor: String,
    /// Timestamp of the reading that raised the alert, as reported
    pub timestamp: String,
    pub message: String,
}

impl SecurityAlert {
    pub fn door_opened(reading: &SensorReading) -> Self {
        let at = reading
            .parsed_timestamp()
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| reading.timestamp.clone());
        Self {
            sensor: "Door".to_string(),
            timestamp: reading.timestamp.clone(),
            message: format!("Door opened during night mode at {}", at),
        }
    }
}

/// Copy of the syncer's view handed out to consumers
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub device_id: String,
    pub status: ConnectionStatus,
    pub connected: bool,
    /// Last-known device state. Holds the fallback until the first successful read.
    pub state: DeviceState,
    pub is_fallback: bool,
    /// Keys in `state` whose timestamp went backwards on the last poll
    pub stale_keys: Vec<String>,
    pub night_mode: bool,
    pub security_alert: Option<SecurityAlert>,
    pub last_seq: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncSnapshot {
    pub fn initial(device_id: impl Into<String>, fallback: DeviceState, night_mode: bool) -> Self {
        Self {
            device_id: device_id.into(),
            status: ConnectionStatus::Unknown,
            connected: false,
            state: fallback,
            is_fallback: true,
            stale_keys: Vec::new(),
            night_mode,
            security_alert: None,
            last_seq: 0,
            updated_at: None,
        }
    }
}
