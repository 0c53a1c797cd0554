//! Sensor Node - MQTT telemetry device
//!
//! A networked sensor node that brings up its network link, holds a
//! persistent MQTT session, publishes simulated sensor readings on a fixed
//! schedule and executes commands received on its control topic.
//!
//! # Overview
//!
//! - [`link`]: network link state machine and the readiness gate
//! - [`transport`]: MQTT session with last will, birth message, reconnect
//!   backoff and resubscription
//! - [`telemetry`]: sensors and the fixed-schedule publisher
//! - [`command`]: control-topic verbs and the dispatcher
//! - [`node`]: bring-up order, the running node and graceful shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use sensornode::protocol::{encode_payload, LifecycleStatus, Reading};
//! use chrono::Utc;
//!
//! let reading = Reading {
//!     device_id: "esp32-qemu-01".to_string(),
//!     metric: "temperature".to_string(),
//!     unit: "C".to_string(),
//!     value: 23.44,
//!     sequence_number: 1,
//!     timestamp: Utc::now(),
//! };
//! let payload = encode_payload(&reading.to_payload()).unwrap();
//! assert_eq!(
//!     payload,
//!     br#"{"device":"esp32-qemu-01","value":23.4,"unit":"C","reading":1}"#
//! );
//!
//! let summary = encode_payload(&LifecycleStatus::complete(20)).unwrap();
//! assert_eq!(summary, br#"{"status":"complete","total_published":20}"#);
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod link;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use node::{run_node, NodeLifecycle};
pub use protocol::*;
pub use telemetry::{Sensor, SimulatedSensor, TelemetryPublisher};
pub use transport::mqtt::MqttSession;
pub use transport::Transport;
