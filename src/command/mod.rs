//! Inbound command handling
//!
//! Commands are bare verbs published on the control topic. The verb set is
//! closed and matched exactly (case-sensitive, no trimming).

pub mod dispatcher;

pub use dispatcher::{CommandDispatcher, DispatchOutcome, SimulatedOutput};

use crate::transport::mqtt::MqttError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Recognised command verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleLed,
    GetStatus,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ToggleLed => "toggle_led",
            Command::GetStatus => "get_status",
        }
    }

    /// Parse a raw payload
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        match std::str::from_utf8(payload) {
            Ok(verb) => verb.parse(),
            Err(_) => Err(CommandError::Unknown(
                String::from_utf8_lossy(payload).into_owned(),
            )),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(verb: &str) -> Result<Self, Self::Err> {
        match verb {
            "toggle_led" => Ok(Command::ToggleLed),
            "get_status" => Ok(Command::GetStatus),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command handling errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to publish reply: {0}")]
    Reply(#[from] MqttError),
}
