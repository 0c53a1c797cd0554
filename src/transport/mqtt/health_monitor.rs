//! Pure health monitoring and reconnection logic for the MQTT session
//!
//! State transitions, reconnection decisions and connection health
//! metrics, kept free of I/O so they can be tested directly.

use super::connection::{ReconnectConfig, SessionState};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after a connection event (pure function)
    ///
    /// `Error` is sticky until a new connect is requested.
    pub fn determine_next_state(current: SessionState, event: &ConnectionEvent) -> SessionState {
        if current == SessionState::Error && !matches!(event, ConnectionEvent::ConnectRequested) {
            return SessionState::Error;
        }

        match event {
            ConnectionEvent::ConnectRequested | ConnectionEvent::ReconnectionStarted(_) => {
                SessionState::Connecting
            }
            ConnectionEvent::ConnAckReceived => SessionState::Connected,
            ConnectionEvent::DisconnectedByBroker
            | ConnectionEvent::NetworkError(_)
            | ConnectionEvent::ClientDisconnected => SessionState::Disconnected,
            ConnectionEvent::PermanentFailure(_) => SessionState::Error,
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Check if connection state allows subscribing (pure function)
    pub fn can_subscribe(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Calculate health metrics for the connection (pure function)
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        last_message_time: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let now = Instant::now();

        let uptime = connect_time.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_time.map(|t| now.duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_message,
            reconnect_count,
            is_healthy: uptime.is_some(),
        }
    }

    /// Log a session state transition
    pub fn log_state_transition(from: SessionState, to: SessionState, event: &ConnectionEvent) {
        match (from, to, event) {
            (_, SessionState::Connected, _) => {
                info!(from = ?from, to = ?to, "MQTT connection established");
            }
            (SessionState::Connected, SessionState::Disconnected, ConnectionEvent::NetworkError(reason)) => {
                warn!(from = ?from, to = ?to, reason = %reason, "MQTT connection lost");
            }
            (_, SessionState::Disconnected, ConnectionEvent::DisconnectedByBroker) => {
                warn!(from = ?from, to = ?to, "MQTT broker closed the connection");
            }
            (_, SessionState::Connecting, ConnectionEvent::ReconnectionStarted(attempt)) => {
                info!(from = ?from, to = ?to, attempt = attempt, "Starting reconnection attempt");
            }
            (_, SessionState::Error, ConnectionEvent::PermanentFailure(reason)) => {
                error!(from = ?from, to = ?to, reason = %reason, "MQTT connection permanently failed");
            }
            _ => {
                info!(from = ?from, to = ?to, "MQTT session state changed");
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequested,
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    PermanentFailure(String),
    /// Local clean disconnect
    ClientDisconnected,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    pub time_since_last_message: Option<Duration>,
    /// Successful reconnections since the session started
    pub reconnect_count: u32,
    pub is_healthy: bool,
}
