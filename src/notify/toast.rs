//! Toast-style notifications for the UI layer
//!
//! Consumes sync events, logs each notification and keeps the most recent
//! ones for the UI to display.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::device::SyncEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded notification history fed by the syncer's events
pub struct ToastNotifier {
    capacity: usize,
    history: RwLock<VecDeque<Toast>>,
}

impl ToastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Collect notifications until the event channel closes
    pub async fn start(self: Arc<Self>, mut events: broadcast::Receiver<SyncEvent>) {
        tracing::info!("Starting notification collector...");

        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(toast) = Self::toast_for(&event) {
                        self.push(toast).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification collector lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Map a sync event to the notification shown for it. Routine state updates show nothing.
    pub fn toast_for(event: &SyncEvent) -> Option<Toast> {
        let (level, title, message) = match event {
            SyncEvent::Connected => (
                ToastLevel::Success,
                "Connected".to_string(),
                "Connected to the home system".to_string(),
            ),
            SyncEvent::Disconnected { reason } => (
                ToastLevel::Error,
                "Disconnected".to_string(),
                format!("Cannot reach the home system, using offline mode ({})", reason),
            ),
            SyncEvent::CommandSent { command, .. } => (
                ToastLevel::Success,
                "Command sent".to_string(),
                format!("{} command sent successfully", command),
            ),
            SyncEvent::CommandFailed { command, message } => (
                ToastLevel::Error,
                "Command failed".to_string(),
                format!("Failed to send {}: {}", command, message),
            ),
            SyncEvent::SecurityAlert(alert) => (
                ToastLevel::Error,
                "SECURITY ALERT!".to_string(),
                alert.message.clone(),
            ),
            SyncEvent::StateUpdated { stale_keys, .. } if !stale_keys.is_empty() => (
                ToastLevel::Info,
                "Stale readings".to_string(),
                format!("Ignoring out-of-order readings for {}", stale_keys.join(", ")),
            ),
            SyncEvent::StateUpdated { .. } => return None,
        };

        Some(Toast {
            level,
            title,
            message,
            timestamp: Utc::now(),
        })
    }

    pub async fn push(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Error => tracing::warn!("[Toast] {}: {}", toast.title, toast.message),
            _ => tracing::info!("[Toast] {}: {}", toast.title, toast.message),
        }

        let mut history = self.history.write().await;
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(toast);
    }

    /// Recent notifications, oldest first
    pub async fn recent(&self) -> Vec<Toast> {
        self.history.read().await.iter().cloned().collect()
    }
}
