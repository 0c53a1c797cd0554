//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and a scripted [`LinkDriver`] so the
//! publisher, the dispatcher and the node lifecycle can be exercised without
//! a broker or a real network interface.

use crate::link::{AddressInfo, LinkDriver, LinkEvent};
use crate::transport::mqtt::{MqttError, SessionState, Subscription, SubscriptionSet};
use crate::transport::{CorrelationId, Message, SessionEvent, Transport};
use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};

/// A publish accepted by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub correlation_id: CorrelationId,
}

impl PublishedMessage {
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Mock transport for testing
///
/// State changes happen only when a test asks for them: `connect` completes
/// the handshake immediately, `simulate_disconnect` and `simulate_connack`
/// model the broker dropping and re-accepting the session.
#[derive(Debug)]
pub struct MockTransport {
    state_tx: Arc<watch::Sender<SessionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    /// Every subscribe the broker would have seen, in order
    applied_subscriptions: Arc<Mutex<Vec<Subscription>>>,
    next_correlation_id: AtomicU64,
    pub should_fail: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            state_tx: Arc::new(state_tx),
            events_tx,
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(SubscriptionSet::new())),
            applied_subscriptions: Arc::new(Mutex::new(Vec::new())),
            next_correlation_id: AtomicU64::new(0),
            should_fail: false,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that is already Connected
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.state_tx.send_replace(SessionState::Connected);
        transport
    }

    /// Connect and publish attempts fail
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Connected, but every publish is rejected
    pub fn with_failing_publishes() -> Self {
        let transport = Self::with_failure();
        transport.state_tx.send_replace(SessionState::Connected);
        transport
    }

    /// Seed the subscription set applied on every ConnAck
    pub fn with_subscription(self, filter: &str, qos: QoS) -> Self {
        if let Ok(mut subscriptions) = self.subscriptions.try_lock() {
            subscriptions.upsert(filter, qos);
        }
        self
    }

    fn transition(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            let _ = self.events_tx.send(SessionEvent::StateChanged { from, to });
        }
    }

    /// Broker accepted the connection: enter Connected and re-apply the
    /// whole subscription set once
    pub async fn simulate_connack(&self) {
        self.transition(SessionState::Connected);

        let subscriptions: Vec<Subscription> =
            self.subscriptions.lock().await.iter().cloned().collect();
        let mut applied = self.applied_subscriptions.lock().await;
        for (index, subscription) in subscriptions.into_iter().enumerate() {
            let _ = self.events_tx.send(SessionEvent::SubscribeAcknowledged {
                packet_id: (index + 1) as u16,
                granted: vec![Some(subscription.qos)],
            });
            applied.push(subscription);
        }
    }

    /// Connection dropped underneath the session
    pub fn simulate_disconnect(&self, reason: &str) {
        self.transition(SessionState::Disconnected);
        let _ = self.events_tx.send(SessionEvent::TransportError {
            reason: reason.to_string(),
        });
    }

    /// Reconnection gave up
    pub fn simulate_permanent_failure(&self) {
        self.transition(SessionState::Error);
    }

    /// Deliver an inbound message as if the broker forwarded it
    pub fn deliver(&self, topic: &str, payload: &str) {
        let message = Message::new(topic, payload, QoS::AtLeastOnce, false);
        let _ = self.events_tx.send(SessionEvent::MessageReceived(message));
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Published messages on `topic`, in publish order
    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn applied_subscriptions(&self) -> Vec<Subscription> {
        self.applied_subscriptions.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.applied_subscriptions.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), MqttError> {
        if self.should_fail {
            self.transition(SessionState::Connecting);
            self.transition(SessionState::Error);
            return Err(MqttError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }
        self.transition(SessionState::Connecting);
        self.simulate_connack().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.transition(SessionState::Disconnected);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<CorrelationId, MqttError> {
        let state = self.session_state();
        if state != SessionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        if self.should_fail {
            return Err(MqttError::ConnectionFailed(
                "Mock publish failure".to_string(),
            ));
        }

        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            correlation_id,
        });

        let _ = self.events_tx.send(SessionEvent::Published {
            correlation_id,
            topic: topic.to_string(),
            qos,
        });
        if qos != QoS::AtMostOnce {
            let _ = self.events_tx.send(SessionEvent::Acknowledged {
                correlation_id,
                packet_id: correlation_id as u16,
            });
        }
        Ok(correlation_id)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError> {
        let state = self.session_state();
        if state != SessionState::Connected {
            return Err(MqttError::NotConnected { state });
        }

        let change = self.subscriptions.lock().await.upsert(filter, qos);
        if change.requires_subscribe() {
            self.applied_subscriptions.lock().await.push(Subscription {
                filter: filter.to_string(),
                qos,
            });
        }
        Ok(())
    }

    fn session_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

/// Link driver that replays a fixed script of events
///
/// Each entry waits for its delay before sending its event. After the script
/// the driver idles until the manager goes away.
#[derive(Debug, Clone)]
pub struct ScriptedLinkDriver {
    script: Vec<(Duration, LinkEvent)>,
}

impl ScriptedLinkDriver {
    pub fn new(script: Vec<(Duration, LinkEvent)>) -> Self {
        Self { script }
    }

    /// Started, Connected after `delay`, then AddressAssigned
    pub fn bring_up(address: AddressInfo, delay: Duration) -> Self {
        Self::new(vec![
            (Duration::ZERO, LinkEvent::Started),
            (delay, LinkEvent::Connected),
            (Duration::ZERO, LinkEvent::AddressAssigned(address)),
        ])
    }
}

#[async_trait]
impl LinkDriver for ScriptedLinkDriver {
    async fn run(self: Box<Self>, events: mpsc::Sender<LinkEvent>) {
        for (delay, event) in self.script {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if events.send(event).await.is_err() {
                return;
            }
        }
        events.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkManager, LinkState};

    #[tokio::test]
    async fn test_mock_transport_records_publishes() {
        let transport = MockTransport::connected();

        let first = transport
            .publish("esp32/status", b"{}".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();
        let second = transport
            .publish("esp32/sensors/humidity", b"{}".to_vec(), QoS::AtMostOnce, false)
            .await
            .unwrap();

        assert!(second > first);
        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "esp32/status");
        assert!(published[0].retain);
        assert_eq!(transport.published_on("esp32/sensors/humidity").await.len(), 1);

        transport.clear_history().await;
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_transport_refuses_when_disconnected() {
        let transport = MockTransport::new();
        let result = transport
            .publish("esp32/status", Vec::new(), QoS::AtMostOnce, false)
            .await;
        assert!(matches!(
            result,
            Err(MqttError::NotConnected {
                state: SessionState::Disconnected
            })
        ));
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_transport_failure_mode() {
        let transport = MockTransport::with_failure();
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.session_state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_connack_reapplies_subscriptions() {
        let transport = MockTransport::new()
            .with_subscription("esp32/commands", QoS::AtLeastOnce)
            .with_subscription("esp32/sensors/#", QoS::AtMostOnce);

        transport.connect().await.unwrap();
        assert_eq!(transport.session_state(), SessionState::Connected);
        assert_eq!(transport.applied_subscriptions().await.len(), 2);

        transport.simulate_disconnect("broker restart");
        transport.simulate_connack().await;
        assert_eq!(transport.applied_subscriptions().await.len(), 4);
    }

    #[tokio::test]
    async fn test_state_changes_are_broadcast() {
        let transport = MockTransport::connected();
        let mut events = transport.events();

        transport.simulate_disconnect("link lost");

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged {
                from: SessionState::Connected,
                to: SessionState::Disconnected,
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::TransportError { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_driver_drives_manager() {
        let address = AddressInfo::new("192.168.4.2".parse().unwrap());
        let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::bring_up(
            address.clone(),
            Duration::from_secs(1),
        )));
        manager.start().unwrap();

        assert_eq!(
            manager.await_ready(Duration::from_secs(5)).await.unwrap(),
            address
        );
        assert_eq!(manager.state(), LinkState::AddressAssigned);
    }
}
