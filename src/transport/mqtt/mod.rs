//! MQTT session implementation
//!
//! This module separates pure functions from I/O operations for better
//! testability:
//!
//! - [`connection`] - session state, backoff and broker options
//! - [`message_handler`] - routing of raw event-loop events
//! - [`health_monitor`] - state transitions and reconnection decisions
//! - [`subscriptions`] - the subscription set re-applied on connect
//! - [`client`] - the session itself and its supervisor task
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensornode::config::NodeConfig;
//! use sensornode::transport::mqtt::{MqttSession, SessionOptions};
//! use sensornode::transport::Transport;
//! use rumqttc::QoS;
//! use std::time::Duration;
//!
//! # async fn example(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let options = SessionOptions::new(&config.device.id, &config.mqtt.broker_url, config.mqtt.clone())
//!     .with_subscription(&config.topics.commands, QoS::AtLeastOnce);
//! let session = MqttSession::new(options)?;
//! session.connect().await?;
//! session.wait_connected(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod subscriptions;

pub use client::{MqttSession, SessionOptions};
pub use connection::{
    configure_mqtt_options, parse_broker_url, BrokerAddress, MqttError, ReconnectConfig,
    SessionState,
};
pub use health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use subscriptions::{Subscription, SubscriptionChange, SubscriptionSet};
