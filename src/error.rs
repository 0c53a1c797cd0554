//! Node-level error taxonomy
//!
//! Component errors ([`LinkError`], [`MqttError`], [`CommandError`],
//! [`ConfigError`]) convert into [`NodeError`], which classifies failures
//! as fatal (bring-up, initial connect, reconnect wait exceeded) or
//! recoverable (mid-session transport errors, unknown commands).

use crate::command::CommandError;
use crate::config::ConfigError;
use crate::link::LinkError;
use crate::transport::mqtt::{MqttError, SessionState};
use std::time::Duration;
use thiserror::Error;

/// Main error type for node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Network link not ready after {0:?}")]
    LinkTimeout(Duration),

    #[error("Network link failure: {0}")]
    LinkFailure(String),

    #[error("Broker did not accept the connection within {0:?}")]
    BrokerConnectTimeout(Duration),

    #[error("Broker connection failed: {0}")]
    BrokerConnectFailed(String),

    #[error("Session not connected (state: {state:?})")]
    NotConnected { state: SessionState },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Session did not reconnect within {0:?}")]
    ReconnectTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl NodeError {
    /// Whether the process should report the error and exit
    pub fn is_fatal(&self) -> bool {
        match self {
            NodeError::LinkTimeout(_)
            | NodeError::LinkFailure(_)
            | NodeError::BrokerConnectTimeout(_)
            | NodeError::BrokerConnectFailed(_)
            | NodeError::ReconnectTimeout(_)
            | NodeError::Config(_) => true,
            NodeError::NotConnected { .. }
            | NodeError::TransportError(_)
            | NodeError::UnknownCommand(_) => false,
        }
    }
}

impl From<LinkError> for NodeError {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::Timeout(after) => NodeError::LinkTimeout(after),
            LinkError::Failure(reason) => NodeError::LinkFailure(reason),
            other => NodeError::LinkFailure(other.to_string()),
        }
    }
}

impl From<MqttError> for NodeError {
    fn from(error: MqttError) -> Self {
        match error {
            MqttError::NotConnected { state } => NodeError::NotConnected { state },
            MqttError::ConnectTimeout(after) => NodeError::BrokerConnectTimeout(after),
            other => NodeError::TransportError(other.to_string()),
        }
    }
}

impl From<CommandError> for NodeError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Unknown(verb) => NodeError::UnknownCommand(verb),
            CommandError::Reply(inner) => inner.into(),
            CommandError::Encode(inner) => NodeError::TransportError(inner.to_string()),
        }
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
