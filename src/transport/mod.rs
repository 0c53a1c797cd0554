//! Transport layer for node messaging
//!
//! This module provides the transport abstraction used by the telemetry
//! publisher and the command dispatcher, and its MQTT implementation.

pub mod mqtt;

use mqtt::{MqttError, SessionState};
use rumqttc::QoS;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Identifier returned by [`Transport::publish`] and echoed in the
/// matching [`SessionEvent`]
pub type CorrelationId = u64;

/// A message received from or destined for the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Session notifications delivered to every subscriber of
/// [`Transport::events`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    SubscribeAcknowledged {
        packet_id: u16,
        granted: Vec<Option<QoS>>,
    },
    /// Publish handed to the wire
    Published {
        correlation_id: CorrelationId,
        topic: String,
        qos: QoS,
    },
    /// PubAck received for a QoS 1 publish
    Acknowledged {
        correlation_id: CorrelationId,
        packet_id: u16,
    },
    /// Publish dropped because the connection went away first
    PublishLost {
        correlation_id: CorrelationId,
        topic: String,
    },
    MessageReceived(Message),
    TransportError {
        reason: String,
    },
}

/// Transport trait for node messaging
///
/// This trait provides an abstraction over the broker session to enable
/// dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start the connection handshake; completion is observed through
    /// [`Transport::state_watch`] or [`Transport::wait_connected`]
    async fn connect(&self) -> Result<(), MqttError>;

    /// Disconnect cleanly and stop reconnecting
    async fn disconnect(&self) -> Result<(), MqttError>;

    /// Queue a publish; fails with `NotConnected` outside Connected
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<CorrelationId, MqttError>;

    /// Add or update a subscription; fails with `NotConnected` outside
    /// Connected
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError>;

    fn session_state(&self) -> SessionState;

    fn state_watch(&self) -> watch::Receiver<SessionState>;

    fn events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Wait until the session is Connected, bounded by `timeout`
    async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let mut state_rx = self.state_watch();
        let outcome = tokio::time::timeout(timeout, async move {
            state_rx
                .wait_for(|state| matches!(state, SessionState::Connected | SessionState::Error))
                .await
                .map(|state| *state)
        })
        .await;

        match outcome {
            Ok(Ok(SessionState::Connected)) => Ok(()),
            Ok(Ok(state)) => Err(MqttError::ConnectionFailed(format!(
                "session entered {state:?} state"
            ))),
            Ok(Err(_)) => Err(MqttError::ConnectionFailed(
                "state channel closed".to_string(),
            )),
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttSession;
