//! Simulated microcontroller for the development hub
//!
//! Plays the device side of the contract: drains queued commands, applies
//! the ones it understands to its relays and reports the result back.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::device::DeviceClient;

/// Sensor/value a command switches to, if the device knows the command
pub fn command_effect(command: &str) -> Option<(&'static str, &'static str)> {
    match command.trim().to_uppercase().as_str() {
        "RELAY1_ON" => Some(("Light", "ON")),
        "RELAY1_OFF" => Some(("Light", "OFF")),
        "RELAY2_ON" => Some(("Relay2", "ON")),
        "RELAY2_OFF" => Some(("Relay2", "OFF")),
        "FAN_ON" => Some(("Fan", "ON")),
        "FAN_OFF" => Some(("Fan", "OFF")),
        _ => None,
    }
}

const INITIAL_READINGS: [(&str, &str); 3] = [("Door", "CLOSED"), ("Light", "OFF"), ("Fan", "OFF")];

pub struct DeviceSimulator {
    client: Arc<DeviceClient>,
    device_id: String,
    poll_interval: Duration,
}

impl DeviceSimulator {
    pub fn new(client: Arc<DeviceClient>, device_id: String, poll_interval: Duration) -> Self {
        Self {
            client,
            device_id,
            poll_interval,
        }
    }

    /// Report initial values, then apply queued commands forever
    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            "[DeviceSim] Simulating {} (interval: {:?})",
            self.device_id,
            self.poll_interval
        );

        self.report_initial().await;

        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            self.step().await;
        }
    }

    /// Report the power-on readings. Returns how many the backend accepted.
    pub async fn report_initial(&self) -> usize {
        let mut reported = 0;
        for (sensor, value) in INITIAL_READINGS {
            let result = self.client.update_status(&self.device_id, sensor, value).await;
            if result.ok {
                reported += 1;
            } else {
                tracing::warn!("[DeviceSim] Initial report {}={} failed: {}", sensor, value, result.message);
            }
        }
        reported
    }

    /// Drain the command queue once. Returns how many commands changed a value.
    pub async fn step(&self) -> usize {
        let mut applied = 0;
        for pending in self.client.get_commands(&self.device_id).await {
            let Some((sensor, value)) = command_effect(&pending.command) else {
                tracing::debug!("[DeviceSim] Ignoring unknown command {}", pending.command);
                continue;
            };

            let result = self.client.update_status(&self.device_id, sensor, value).await;
            if result.ok {
                applied += 1;
            } else {
                tracing::warn!("[DeviceSim] Report {}={} failed: {}", sensor, value, result.message);
            }
        }
        applied
    }
}
