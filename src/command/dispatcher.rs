//! Command dispatcher
//!
//! Consumes session events, picks out messages on the control topic and
//! executes the matching [`Command`]. Each message yields at most one side
//! effect and at most one reply.

use super::{Command, CommandError};
use crate::config::TopicsSection;
use crate::observability::metrics::NodeMetrics;
use crate::protocol::{encode_payload, StatusReport};
use crate::transport::{CorrelationId, Message, SessionEvent, Transport};
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Simulated digital output driven by `toggle_led`
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    on: AtomicBool,
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the output; returns the new level
    pub fn toggle(&self) -> bool {
        !self.on.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// What a dispatched message led to
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Not addressed to the control topic
    Ignored,
    Toggled { led_on: bool },
    StatusReplied {
        correlation_id: CorrelationId,
        report: StatusReport,
    },
}

/// Routes control-topic messages to command handlers
pub struct CommandDispatcher<T: Transport> {
    transport: Arc<T>,
    control_topic: String,
    status_topic: String,
    metrics: Arc<NodeMetrics>,
    output: Arc<SimulatedOutput>,
}

impl<T: Transport + 'static> CommandDispatcher<T> {
    pub fn new(transport: Arc<T>, topics: &TopicsSection, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            transport,
            control_topic: topics.commands.clone(),
            status_topic: topics.status.clone(),
            metrics,
            output: Arc::new(SimulatedOutput::new()),
        }
    }

    pub fn output(&self) -> Arc<SimulatedOutput> {
        self.output.clone()
    }

    /// Execute the command carried by `message`
    ///
    /// Messages on any topic other than the control topic are ignored, so
    /// traffic from the telemetry wildcard subscription never reaches the
    /// parser.
    pub async fn dispatch(&self, message: &Message) -> Result<DispatchOutcome, CommandError> {
        if message.topic != self.control_topic {
            debug!(topic = %message.topic, "Ignoring message outside the control topic");
            return Ok(DispatchOutcome::Ignored);
        }

        let command = Command::parse(&message.payload)?;
        self.metrics.record_command();
        info!(command = %command, "Received command");

        match command {
            Command::ToggleLed => {
                let led_on = self.output.toggle();
                info!(led_on = led_on, "LED toggled");
                Ok(DispatchOutcome::Toggled { led_on })
            }
            Command::GetStatus => {
                let report = self.metrics.status_report();
                let payload = encode_payload(&report)?;
                let correlation_id = self
                    .transport
                    .publish(&self.status_topic, payload, QoS::AtMostOnce, false)
                    .await?;
                info!(
                    topic = %self.status_topic,
                    uptime_s = report.uptime_s,
                    publish_count = report.publish_count,
                    correlation_id = correlation_id,
                    "Published status reply"
                );
                Ok(DispatchOutcome::StatusReplied {
                    correlation_id,
                    report,
                })
            }
        }
    }

    /// Dispatch and log the outcome; failures never propagate
    pub async fn handle_message(&self, message: &Message) {
        match self.dispatch(message).await {
            Ok(_) => {}
            Err(CommandError::Unknown(verb)) => {
                self.metrics.record_unknown_command();
                warn!(command = %verb, topic = %message.topic, "Unknown command");
            }
            Err(e) => error!(topic = %message.topic, "Command handling failed: {}", e),
        }
    }

    /// Consume session events until shutdown
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut events = self.transport.events();
        let span = crate::command_span!(topic = %self.control_topic);
        tokio::spawn(async move {
            info!("Command dispatcher started");
            loop {
                tokio::select! {
                    _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,
                    received = events.recv() => match received {
                        Ok(SessionEvent::MessageReceived(message)) => {
                            self.handle_message(&message).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Command dispatcher lagged behind session events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            info!("Command dispatcher stopped");
        }.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn dispatcher() -> (CommandDispatcher<MockTransport>, Arc<MockTransport>, Arc<NodeMetrics>) {
        let transport = Arc::new(MockTransport::connected());
        let metrics = Arc::new(NodeMetrics::new());
        let dispatcher =
            CommandDispatcher::new(transport.clone(), &TopicsSection::default(), metrics.clone());
        (dispatcher, transport, metrics)
    }

    fn command(payload: &str) -> Message {
        Message::new("esp32/commands", payload, QoS::AtLeastOnce, false)
    }

    #[test]
    fn test_simulated_output_toggles() {
        let output = SimulatedOutput::new();
        assert!(!output.is_on());
        assert!(output.toggle());
        assert!(output.is_on());
        assert!(!output.toggle());
    }

    #[tokio::test]
    async fn test_toggle_led_has_no_reply() {
        let (dispatcher, transport, _) = dispatcher();

        let outcome = dispatcher.dispatch(&command("toggle_led")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Toggled { led_on: true });
        assert!(dispatcher.output().is_on());
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_status_replies_once() {
        let (dispatcher, transport, metrics) = dispatcher();
        metrics.record_telemetry_published();
        metrics.record_telemetry_published();

        let outcome = dispatcher.dispatch(&command("get_status")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::StatusReplied { .. }));

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "esp32/status");
        assert_eq!(published[0].qos, QoS::AtMostOnce);
        assert!(!published[0].retain);
        let report: StatusReport = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(report.publish_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_verb_has_no_side_effects() {
        let (dispatcher, transport, metrics) = dispatcher();

        let result = dispatcher.dispatch(&command("reboot")).await;
        assert!(matches!(result, Err(CommandError::Unknown(ref verb)) if verb == "reboot"));

        dispatcher.handle_message(&command("reboot")).await;
        assert!(transport.get_published_messages().await.is_empty());
        assert!(!dispatcher.output().is_on());
        assert_eq!(metrics.snapshot().commands.unknown, 1);
    }

    #[tokio::test]
    async fn test_other_topics_ignored() {
        let (dispatcher, transport, _) = dispatcher();
        let message = Message::new("esp32/sensors/temperature", "toggle_led", QoS::AtMostOnce, false);

        let outcome = dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(!dispatcher.output().is_on());
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_reply_fails_when_disconnected() {
        let (dispatcher, transport, _) = dispatcher();
        transport.simulate_disconnect("link lost");

        let result = dispatcher.dispatch(&command("get_status")).await;
        assert!(matches!(result, Err(CommandError::Reply(_))));
    }
}
