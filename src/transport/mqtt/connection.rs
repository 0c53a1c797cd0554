//! Pure connection state management for the MQTT session
//!
//! Session state, reconnection backoff and broker option construction.

use crate::config::{MqttSection, ReconnectSection};
use crate::protocol::topics::ValidationError;
use rumqttc::{LastWill, MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Handshake in progress (initial connect or reconnection attempt)
    Connecting,
    /// ConnAck received; publish and subscribe are allowed
    Connected,
    /// Reconnection abandoned after the configured number of attempts
    Error,
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt
    pub initial_delay_ms: u64,
    /// Cap applied to the doubled delay
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            initial_delay_ms: section.initial_delay_ms,
            max_delay_ms: section.max_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Backoff for the given 1-based attempt: `initial * 2^(attempt-1)`,
    /// capped at `max_delay_ms`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Sum of all backoff delays, or None for unlimited retries
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .fold(0u64, |total, delay| total.saturating_add(delay))
        })
    }
}

/// MQTT session errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
    #[error("Network link not ready")]
    LinkNotReady,
    #[error("Broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] rumqttc::ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] rumqttc::ClientError),
    #[error("Invalid topic '{topic}': {source}")]
    InvalidTopic {
        topic: String,
        source: ValidationError,
    },
    #[error("Session already started")]
    AlreadyStarted,
}

/// Parsed broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Build broker options for a session
///
/// The client id is stable across reconnects. The last will is attached
/// here and therefore registered with every connect.
pub fn configure_mqtt_options(
    client_id: &str,
    broker_url: &str,
    config: &MqttSection,
    last_will: Option<&LastWill>,
) -> Result<MqttOptions, MqttError> {
    let broker = parse_broker_url(broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id, broker.host, broker.port);

    if broker.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.get_username() {
        mqtt_options.set_credentials(username, config.get_password().unwrap_or_default());
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    mqtt_options.set_clean_session(true);

    if let Some(will) = last_will {
        mqtt_options.set_last_will(will.clone());
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_payload, LifecycleStatus};
    use rumqttc::QoS;

    fn test_mqtt_config() -> MqttSection {
        crate::config::NodeConfig::test_config().mqtt
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = ReconnectConfig {
            max_attempts: None,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        };

        assert_eq!(config.calculate_backoff_delay(1), 500);
        assert_eq!(config.calculate_backoff_delay(2), 1_000);
        assert_eq!(config.calculate_backoff_delay(3), 2_000);
        assert_eq!(config.calculate_backoff_delay(4), 4_000);
        assert_eq!(config.calculate_backoff_delay(5), 5_000);
        assert_eq!(config.calculate_backoff_delay(100), 5_000);
    }

    #[test]
    fn test_calculate_max_total_time() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(config.calculate_max_total_time(), Some(700));
        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_parse_broker_url_defaults() {
        let plain = parse_broker_url("mqtt://10.0.2.2").unwrap();
        assert_eq!(plain.host, "10.0.2.2");
        assert_eq!(plain.port, 1883);
        assert!(!plain.tls);

        let secure = parse_broker_url("mqtts://broker.example.com").unwrap();
        assert_eq!(secure.port, 8883);
        assert!(secure.tls);

        let explicit = parse_broker_url("mqtt://test.mosquitto.org:1884").unwrap();
        assert_eq!(explicit.port, 1884);
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://localhost:1883", ""] {
            assert!(
                matches!(parse_broker_url(url), Err(MqttError::InvalidBrokerUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options_keeps_client_id() {
        let config = test_mqtt_config();
        let options =
            configure_mqtt_options("esp32-qemu-01", "mqtt://localhost:1883", &config, None)
                .unwrap();
        assert_eq!(options.client_id(), "esp32-qemu-01");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_configure_mqtt_options_sets_last_will() {
        let config = test_mqtt_config();
        let payload = encode_payload(&LifecycleStatus::offline()).unwrap();
        let will = LastWill::new("esp32/status", payload, QoS::AtLeastOnce, true);

        let options =
            configure_mqtt_options("node", "mqtt://localhost", &config, Some(&will)).unwrap();

        let registered = options.last_will().unwrap();
        assert_eq!(registered.topic, "esp32/status");
        assert_eq!(registered.qos, QoS::AtLeastOnce);
        assert!(registered.retain);
        assert_eq!(&registered.message[..], br#"{"status":"offline"}"#);
    }

    #[test]
    fn test_configure_mqtt_options_reads_credentials_from_env() {
        let mut config = test_mqtt_config();
        config.username_env = Some("SENSORNODE_TEST_OPTIONS_USER".to_string());
        config.password_env = Some("SENSORNODE_TEST_OPTIONS_PASS".to_string());
        std::env::set_var("SENSORNODE_TEST_OPTIONS_USER", "device");
        std::env::set_var("SENSORNODE_TEST_OPTIONS_PASS", "secret");

        let options =
            configure_mqtt_options("node", "mqtt://localhost", &config, None).unwrap();
        assert_eq!(
            options.credentials(),
            Some(("device".to_string(), "secret".to_string()))
        );

        config.username_env = Some("SENSORNODE_TEST_OPTIONS_USER_UNSET".to_string());
        let options =
            configure_mqtt_options("node", "mqtt://localhost", &config, None).unwrap();
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: SessionState::Disconnected,
            },
            MqttError::LinkNotReady,
            MqttError::ConnectTimeout(Duration::from_secs(30)),
            MqttError::ConnectionFailed("test".to_string()),
            MqttError::AlreadyStarted,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
