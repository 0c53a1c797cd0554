//! Thread-safe node metrics
//!
//! Atomic counters shared by `Arc` between the telemetry publisher, the
//! command dispatcher, the session event observer and the health endpoint.

use crate::protocol::StatusReport;
use crate::transport::mqtt::SessionState;
use crate::transport::SessionEvent;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Node counters
pub struct NodeMetrics {
    started_at: Instant,

    // Telemetry
    publish_count: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,

    // Commands
    commands_handled: AtomicU64,
    unknown_commands: AtomicU64,

    // MQTT session
    mqtt_connected: AtomicBool,
    connections_established: AtomicU64,
    connection_losses: AtomicU64,
    messages_sent: AtomicU64,
    messages_acknowledged: AtomicU64,
    messages_lost: AtomicU64,
    messages_received: AtomicU64,
    transport_errors: AtomicU64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            publish_count: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
            unknown_commands: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connections_established: AtomicU64::new(0),
            connection_losses: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_acknowledged: AtomicU64::new(0),
            messages_lost: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
        }
    }

    /// Count one accepted telemetry publish; returns the new total
    pub fn record_telemetry_published(&self) -> u64 {
        self.publish_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    pub fn record_cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_command(&self) {
        self.unknown_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    /// Record `{"uptime_s","publish_count"}`
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            uptime_s: self.uptime_secs(),
            publish_count: self.publish_count(),
        }
    }

    /// Fold a session event into the MQTT counters
    pub fn observe_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => {
                let connected = *to == SessionState::Connected;
                self.mqtt_connected.store(connected, Ordering::Relaxed);
                if connected {
                    self.connections_established.fetch_add(1, Ordering::Relaxed);
                } else if *from == SessionState::Connected {
                    self.connection_losses.fetch_add(1, Ordering::Relaxed);
                }
            }
            SessionEvent::Published { .. } => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::Acknowledged { .. } => {
                self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::PublishLost { .. } => {
                self.messages_lost.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::MessageReceived(_) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::TransportError { .. } => {
                self.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
            SessionEvent::SubscribeAcknowledged { .. } => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: current_timestamp(),
            uptime_seconds: self.uptime_secs(),
            telemetry: TelemetryMetrics {
                publish_count: self.publish_count(),
                cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
                cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                handled: self.commands_handled.load(Ordering::Relaxed),
                unknown: self.unknown_commands.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.is_connected(),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_losses: self.connection_losses.load(Ordering::Relaxed),
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
                messages_lost: self.messages_lost.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                transport_errors: self.transport_errors.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete metrics snapshot for export
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub telemetry: TelemetryMetrics,
    pub commands: CommandMetrics,
    pub mqtt: MqttMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMetrics {
    pub publish_count: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub handled: u64,
    pub unknown: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connections_established: u64,
    pub connection_losses: u64,
    pub messages_sent: u64,
    pub messages_acknowledged: u64,
    pub messages_lost: u64,
    pub messages_received: u64,
    pub transport_errors: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Message;
    use rumqttc::QoS;
    use std::sync::Arc;

    #[test]
    fn test_publish_counter() {
        let metrics = NodeMetrics::new();
        assert_eq!(metrics.record_telemetry_published(), 1);
        assert_eq!(metrics.record_telemetry_published(), 2);
        assert_eq!(metrics.status_report().publish_count, 2);
    }

    #[test]
    fn test_session_events_update_mqtt_metrics() {
        let metrics = NodeMetrics::new();

        metrics.observe_session_event(&SessionEvent::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::Connected,
        });
        assert!(metrics.is_connected());

        metrics.observe_session_event(&SessionEvent::Published {
            correlation_id: 1,
            topic: "esp32/status".to_string(),
            qos: QoS::AtLeastOnce,
        });
        metrics.observe_session_event(&SessionEvent::MessageReceived(Message::new(
            "esp32/commands",
            "get_status",
            QoS::AtLeastOnce,
            false,
        )));
        metrics.observe_session_event(&SessionEvent::StateChanged {
            from: SessionState::Connected,
            to: SessionState::Disconnected,
        });

        let snapshot = metrics.snapshot();
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connections_established, 1);
        assert_eq!(snapshot.mqtt.connection_losses, 1);
        assert_eq!(snapshot.mqtt.messages_sent, 1);
        assert_eq!(snapshot.mqtt.messages_received, 1);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(NodeMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.record_telemetry_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.publish_count(), 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = NodeMetrics::new();
        metrics.record_unknown_command();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["commands"]["unknown"], 1);
        assert_eq!(json["telemetry"]["publish_count"], 0);
    }
}
