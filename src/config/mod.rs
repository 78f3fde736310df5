//! Configuration module

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Remote device backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Appended to every endpoint name (`get_status` -> `get_status.php`). Empty for none.
    #[serde(default = "default_endpoint_extension")]
    pub endpoint_extension: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_follow_up_delay_ms")]
    pub follow_up_delay_ms: u64,
    /// Known keys and the conservative value reported when the device cannot be read
    #[serde(default = "default_fallback")]
    pub fallback: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_millis(self.follow_up_delay_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            device_id: default_device_id(),
            endpoint_extension: default_endpoint_extension(),
            request_timeout_ms: default_request_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            follow_up_delay_ms: default_follow_up_delay_ms(),
            fallback: default_fallback(),
        }
    }
}

/// In-memory device hub (development backend)
#[derive(Debug, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hub_port")]
    pub port: u16,
    /// Run a simulated microcontroller against the hub
    #[serde(default)]
    pub simulate_device: bool,
    #[serde(default = "default_simulator_interval_ms")]
    pub simulator_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_hub_port(),
            simulate_device: false,
            simulator_interval_ms: default_simulator_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_history")]
    pub history: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            history: default_history(),
        }
    }
}

/// Home security panel
#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// Starting value of the night-mode switch; toggled at runtime through the API
    #[serde(default)]
    pub night_mode: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_base_url() -> String {
    "http://127.0.0.1:8091/api".to_string()
}

fn default_device_id() -> String {
    "E1".to_string()
}

fn default_endpoint_extension() -> String {
    "php".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_follow_up_delay_ms() -> u64 {
    1_000
}

fn default_fallback() -> BTreeMap<String, String> {
    [("Door", "CLOSED"), ("Light", "OFF"), ("Fan", "OFF")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_hub_port() -> u16 {
    8091
}

fn default_simulator_interval_ms() -> u64 {
    1_000
}

fn default_history() -> usize {
    50
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("ASR").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration, using defaults: {}", e);
            Config::default()
        });

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_source() {
        let settings = config::Config::builder().build().unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.server.port, 8090);
        assert_eq!(config.device.device_id, "E1");
        assert_eq!(config.device.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.device.fallback.get("Door").map(String::as_str), Some("CLOSED"));
        assert!(!config.hub.enabled);
        assert!(!config.security.night_mode);
    }

    #[test]
    fn test_file_overrides() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [device]
                base_url = "https://example.com/api"
                endpoint_extension = ""
                poll_interval_secs = 0

                [device.fallback]
                Gate = "CLOSED"

                [security]
                night_mode = true
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.device.base_url, "https://example.com/api");
        assert!(config.device.endpoint_extension.is_empty());
        // Zero would spin the poll loop
        assert_eq!(config.device.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.device.fallback.len(), 1);
        assert_eq!(config.device.request_timeout_ms, 10_000);
        assert!(config.security.night_mode);
    }
}
