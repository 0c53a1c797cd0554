//! Node configuration system
//!
//! Configuration is read from a TOML file. Only `[device]` and `[mqtt]` are
//! required; every other section falls back to the defaults the firmware
//! shipped with (30 s link timeout, 10 readings every 5 s, ...).

use crate::protocol::topics::{validate_client_id, validate_topic_name, ValidationError};
use crate::transport::mqtt::parse_broker_url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main node configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Stable client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Broker tried once if the primary never reaches Connected
    #[serde(default)]
    pub fallback_broker_url: Option<String>,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Upper bound for the initial broker handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Status heartbeat interval in seconds (0 disables the heartbeat)
    #[serde(default)]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl MqttSection {
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.password_env.as_ref())
    }
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// None retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: None,
        }
    }
}

/// Network link bring-up settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    /// Pause between address assignment and the first broker connect
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// How often the host driver re-checks that the address is still usable
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    2000
}

fn default_probe_interval() -> u64 {
    5
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
            settle_delay_ms: default_settle_delay(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl LinkSection {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Telemetry publishing schedule and simulated sensors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Number of publish cycles before the summary is sent
    #[serde(default = "default_readings")]
    pub readings: u32,
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// How long a cycle may wait for the session to come back
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait_secs: u64,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
}

fn default_readings() -> u32 {
    10
}

fn default_interval() -> u64 {
    5000
}

fn default_reconnect_wait() -> u64 {
    30
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            metric: "temperature".to_string(),
            unit: "C".to_string(),
            base: 20.0,
            spread: 10.0,
        },
        SensorConfig {
            metric: "humidity".to_string(),
            unit: "%".to_string(),
            base: 40.0,
            spread: 30.0,
        },
    ]
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            readings: default_readings(),
            interval_ms: default_interval(),
            reconnect_wait_secs: default_reconnect_wait(),
            sensors: default_sensors(),
        }
    }
}

impl TelemetrySection {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }
}

/// Simulated sensor: samples fall in `[base, base + spread)` in 0.1 steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub metric: String,
    pub unit: String,
    pub base: f64,
    pub spread: f64,
}

/// Topic namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Telemetry is published to `<telemetry_root>/<metric>`
    #[serde(default = "default_telemetry_root")]
    pub telemetry_root: String,
    #[serde(default = "default_commands_topic")]
    pub commands: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
}

fn default_telemetry_root() -> String {
    "esp32/sensors".to_string()
}

fn default_commands_topic() -> String {
    "esp32/commands".to_string()
}

fn default_status_topic() -> String {
    "esp32/status".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            telemetry_root: default_telemetry_root(),
            commands: default_commands_topic(),
            status: default_status_topic(),
        }
    }
}

impl TopicsSection {
    /// `esp32/sensors/temperature`
    pub fn telemetry_topic(&self, metric: &str) -> String {
        format!("{}/{}", self.telemetry_root, metric)
    }

    /// `esp32/sensors/#`
    pub fn telemetry_filter(&self) -> String {
        format!("{}/#", self.telemetry_root)
    }
}

/// Optional HTTP health endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default)]
    pub port: Option<u16>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(ValidationError),
    #[error("Invalid topic '{topic}': {source}")]
    InvalidTopic {
        topic: String,
        source: ValidationError,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NodeConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check identifiers, topics and schedule values
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.device.id).map_err(ConfigError::InvalidDeviceId)?;

        for broker_url in
            std::iter::once(&self.mqtt.broker_url).chain(self.mqtt.fallback_broker_url.iter())
        {
            parse_broker_url(broker_url).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }

        for topic in [
            &self.topics.telemetry_root,
            &self.topics.commands,
            &self.topics.status,
        ] {
            validate_topic_name(topic).map_err(|source| ConfigError::InvalidTopic {
                topic: topic.clone(),
                source,
            })?;
        }

        if self.telemetry.readings == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry.readings must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.sensors.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[telemetry.sensors]] entry is required".to_string(),
            ));
        }
        for sensor in &self.telemetry.sensors {
            let topic = self.topics.telemetry_topic(&sensor.metric);
            validate_topic_name(&topic)
                .map_err(|source| ConfigError::InvalidTopic { topic, source })?;
        }

        if self.mqtt.reconnect.initial_delay_ms == 0
            || self.mqtt.reconnect.max_delay_ms < self.mqtt.reconnect.initial_delay_ms
        {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect requires 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if self.mqtt.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect.max_attempts must be greater than 0 or omitted".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "esp32-qemu-01"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
