//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client and event loop. A supervisor task
//! polls the event loop, drives the session state machine, re-applies the
//! subscription set on every ConnAck and reconnects with capped
//! exponential backoff.

use super::connection::{configure_mqtt_options, parse_broker_url, MqttError, ReconnectConfig, SessionState};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use super::subscriptions::{Subscription, SubscriptionSet};
use crate::config::MqttSection;
use crate::link::LinkReadiness;
use crate::protocol::topics::{validate_topic_filter, validate_topic_name};
use crate::transport::{CorrelationId, Message, SessionEvent, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, LastWill, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Construction parameters for an [`MqttSession`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub broker_url: String,
    pub mqtt: MqttSection,
    /// Registered with every connect
    pub last_will: Option<LastWill>,
    /// Published on every ConnAck, before the subscriptions are re-applied
    pub birth_message: Option<Message>,
    pub subscriptions: Vec<(String, QoS)>,
}

impl SessionOptions {
    pub fn new(client_id: &str, broker_url: &str, mqtt: MqttSection) -> Self {
        Self {
            client_id: client_id.to_string(),
            broker_url: broker_url.to_string(),
            mqtt,
            last_will: None,
            birth_message: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn with_last_will(mut self, last_will: LastWill) -> Self {
        self.last_will = Some(last_will);
        self
    }

    pub fn with_birth_message(mut self, message: Message) -> Self {
        self.birth_message = Some(message);
        self
    }

    pub fn with_subscription(mut self, filter: &str, qos: QoS) -> Self {
        self.subscriptions.push((filter.to_string(), qos));
        self
    }
}

/// Immutable settings shared with the supervisor
#[derive(Debug)]
struct SessionSettings {
    client_id: String,
    broker_url: String,
    mqtt: MqttSection,
    last_will: Option<LastWill>,
    birth_message: Option<Message>,
    reconnect_config: ReconnectConfig,
}

impl SessionSettings {
    /// Create a client and event loop; used for the initial connection and
    /// every reconnection attempt
    fn create_connection(&self) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(
            &self.client_id,
            &self.broker_url,
            &self.mqtt,
            self.last_will.as_ref(),
        )?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }
}

#[derive(Debug, Clone)]
struct PendingPublish {
    correlation_id: CorrelationId,
    topic: String,
    qos: QoS,
}

#[derive(Debug, Default)]
struct ConnectionStats {
    connect_time: Option<Instant>,
    last_message_time: Option<Instant>,
    reconnect_count: u32,
    ever_connected: bool,
}

/// Mutable session data guarded by one lock
///
/// The lock is never held across an await, so queueing a request and
/// recording it happen atomically with respect to the supervisor.
struct SessionInner {
    client: Option<AsyncClient>,
    subscriptions: SubscriptionSet,
    /// Requests handed to the client, in the order the event loop will send them
    queued: VecDeque<PendingPublish>,
    /// QoS >= 1 publishes on the wire, keyed by packet id
    inflight: HashMap<u16, PendingPublish>,
    next_correlation_id: CorrelationId,
    stats: ConnectionStats,
}

impl SessionInner {
    fn enqueue_publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<CorrelationId, MqttError> {
        let client = self.client.as_ref().ok_or(MqttError::NotConnected {
            state: SessionState::Disconnected,
        })?;
        client
            .try_publish(topic, qos, retain, payload)
            .map_err(MqttError::PublishFailed)?;

        self.next_correlation_id += 1;
        let correlation_id = self.next_correlation_id;
        self.queued.push_back(PendingPublish {
            correlation_id,
            topic: topic.to_string(),
            qos,
        });
        Ok(correlation_id)
    }

    fn drain_pending(&mut self) -> Vec<PendingPublish> {
        let mut lost: Vec<PendingPublish> = self.inflight.drain().map(|(_, p)| p).collect();
        lost.extend(self.queued.drain(..));
        lost.sort_by_key(|pending| pending.correlation_id);
        lost
    }
}

/// State and event channels shared by the session and its supervisor
#[derive(Clone)]
struct SessionChannels {
    state_tx: Arc<watch::Sender<SessionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state_tx: Arc::new(state_tx),
            events_tx,
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Apply a connection event to the state machine and announce the change
    fn transition(&self, event: ConnectionEvent) -> SessionState {
        let from = self.state();
        let to = HealthMonitor::determine_next_state(from, &event);
        if from != to {
            HealthMonitor::log_state_transition(from, to, &event);
            self.state_tx.send_replace(to);
            self.emit(SessionEvent::StateChanged { from, to });
        }
        to
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn report_lost(&self, lost: Vec<PendingPublish>) {
        for pending in lost {
            warn!(
                correlation_id = pending.correlation_id,
                topic = %pending.topic,
                "Publish lost before the broker confirmed it"
            );
            self.emit(SessionEvent::PublishLost {
                correlation_id: pending.correlation_id,
                topic: pending.topic,
            });
        }
    }
}

/// MQTT broker session for the node
pub struct MqttSession {
    settings: Arc<SessionSettings>,
    link: Option<LinkReadiness>,
    inner: Arc<Mutex<SessionInner>>,
    channels: SessionChannels,
    shutdown_tx: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    pub fn new(options: SessionOptions) -> Result<Self, MqttError> {
        parse_broker_url(&options.broker_url)?;

        let mut subscriptions = SubscriptionSet::new();
        for (filter, qos) in &options.subscriptions {
            validate_topic_filter(filter).map_err(|source| MqttError::InvalidTopic {
                topic: filter.clone(),
                source,
            })?;
            subscriptions.upsert(filter, *qos);
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            settings: Arc::new(SessionSettings {
                reconnect_config: ReconnectConfig::from(&options.mqtt.reconnect),
                client_id: options.client_id,
                broker_url: options.broker_url,
                mqtt: options.mqtt,
                last_will: options.last_will,
                birth_message: options.birth_message,
            }),
            link: None,
            inner: Arc::new(Mutex::new(SessionInner {
                client: None,
                subscriptions,
                queued: VecDeque::new(),
                inflight: HashMap::new(),
                next_correlation_id: 0,
                stats: ConnectionStats::default(),
            })),
            channels: SessionChannels::new(),
            shutdown_tx,
            closing: Arc::new(AtomicBool::new(false)),
            supervisor: Mutex::new(None),
        })
    }

    /// Gate publishing and (re)connecting on link readiness
    pub fn with_link(mut self, link: LinkReadiness) -> Self {
        self.link = Some(link);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    pub fn broker_url(&self) -> &str {
        &self.settings.broker_url
    }

    /// Current subscription set, in insertion order
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let inner = self.inner.lock().await;
        inner.subscriptions.iter().cloned().collect()
    }

    /// Get health metrics for the connection
    pub async fn health_metrics(&self) -> HealthMetrics {
        let inner = self.inner.lock().await;
        HealthMonitor::calculate_health_metrics(
            inner.stats.connect_time,
            inner.stats.last_message_time,
            inner.stats.reconnect_count,
        )
    }

    fn check_link(&self) -> Result<(), MqttError> {
        match &self.link {
            Some(link) if !link.is_ready() => Err(MqttError::LinkNotReady),
            _ => Ok(()),
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self.channels.state();
        if !HealthMonitor::can_publish(state) {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), MqttError> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(MqttError::AlreadyStarted);
        }
        self.check_link()?;

        let (client, event_loop) = self.settings.create_connection()?;
        self.inner.lock().await.client = Some(client);

        self.closing.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);
        self.channels.transition(ConnectionEvent::ConnectRequested);

        info!(
            client_id = %self.settings.client_id,
            broker_url = %self.settings.broker_url,
            max_reconnect_time_ms = ?self.settings.reconnect_config.calculate_max_total_time(),
            "Connecting to MQTT broker"
        );

        let task = Supervisor {
            settings: self.settings.clone(),
            link: self.link.clone(),
            inner: self.inner.clone(),
            channels: self.channels.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            closing: self.closing.clone(),
            attempts: 0,
        };
        let span = crate::mqtt_span!(
            client_id = %self.settings.client_id,
            broker_url = %self.settings.broker_url
        );
        *supervisor = Some(tokio::spawn(task.run(event_loop).instrument(span)));
        Ok(())
    }

    async fn stop(&self) -> Result<(), MqttError> {
        let Some(mut handle) = self.supervisor.lock().await.take() else {
            debug!("Disconnect requested without an active session");
            return Ok(());
        };

        self.closing.store(true, Ordering::SeqCst);

        let connected = self.channels.state() == SessionState::Connected;
        let mut result = Ok(());
        if connected {
            let inner = self.inner.lock().await;
            if let Some(client) = &inner.client {
                result = client
                    .try_disconnect()
                    .map_err(|e| MqttError::ConnectionFailed(e.to_string()));
            }
        }

        if connected && result.is_ok() {
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => warn!("Event loop task didn't shut down gracefully, forcing stop"),
            }
        }

        self.shutdown_tx.send_replace(true);
        handle.abort();

        self.channels.transition(ConnectionEvent::ClientDisconnected);
        let lost = {
            let mut inner = self.inner.lock().await;
            inner.client = None;
            inner.stats.connect_time = None;
            inner.drain_pending()
        };
        self.channels.report_lost(lost);

        info!(client_id = %self.settings.client_id, "MQTT session disconnected");
        result
    }
}

#[async_trait]
impl Transport for MqttSession {
    async fn connect(&self) -> Result<(), MqttError> {
        self.start().await
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.stop().await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<CorrelationId, MqttError> {
        validate_topic_name(topic).map_err(|source| MqttError::InvalidTopic {
            topic: topic.to_string(),
            source,
        })?;
        self.check_link()?;
        self.check_connection_state()?;

        let correlation_id = self
            .inner
            .lock()
            .await
            .enqueue_publish(topic, payload, qos, retain)?;

        debug!(
            topic = %topic,
            qos = ?qos,
            retain = retain,
            correlation_id = correlation_id,
            "Publish queued"
        );
        Ok(correlation_id)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError> {
        validate_topic_filter(filter).map_err(|source| MqttError::InvalidTopic {
            topic: filter.to_string(),
            source,
        })?;

        let state = self.channels.state();
        if !HealthMonitor::can_subscribe(state) {
            return Err(MqttError::NotConnected { state });
        }

        let mut inner = self.inner.lock().await;
        let change = inner.subscriptions.upsert(filter, qos);
        if !change.requires_subscribe() {
            debug!(filter = %filter, qos = ?qos, "Subscription unchanged");
            return Ok(());
        }

        let client = inner.client.as_ref().ok_or(MqttError::NotConnected { state })?;
        client
            .try_subscribe(filter, qos)
            .map_err(MqttError::SubscriptionFailed)?;
        info!(filter = %filter, qos = ?qos, change = ?change, "Subscribing");
        Ok(())
    }

    fn session_state(&self) -> SessionState {
        self.channels.state()
    }

    fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.channels.state_tx.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.channels.events_tx.subscribe()
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Event-loop supervisor task
struct Supervisor {
    settings: Arc<SessionSettings>,
    link: Option<LinkReadiness>,
    inner: Arc<Mutex<SessionInner>>,
    channels: SessionChannels,
    shutdown_rx: watch::Receiver<bool>,
    closing: Arc<AtomicBool>,
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!(
            client_id = %self.settings.client_id,
            "Starting MQTT event loop with reconnection supervisor"
        );
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                    info!("Shutdown signal received, stopping reconnection supervisor");
                    break;
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => self.process_event(&event, &mut event_loop).await,
                        Err(e) => {
                            self.handle_connection_lost(
                                ConnectionEvent::NetworkError(e.to_string()),
                                &mut event_loop,
                            )
                            .await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!(client_id = %self.settings.client_id, "MQTT event loop stopped");
    }

    /// Returns true to keep polling, false to stop the supervisor
    async fn process_event(&mut self, event: &rumqttc::Event, event_loop: &mut EventLoop) -> bool {
        match MessageHandler::route_mqtt_event(event) {
            EventRoute::ConnectionAcknowledged { session_present } => {
                self.on_connected(session_present).await;
                true
            }
            EventRoute::ConnectionRefused(code) => {
                self.handle_connection_lost(
                    ConnectionEvent::NetworkError(format!("connection refused: {code}")),
                    event_loop,
                )
                .await
            }
            EventRoute::MessageReceived(message) => {
                self.inner.lock().await.stats.last_message_time = Some(Instant::now());
                debug!(
                    target: "mqtt_transport",
                    topic = %message.topic,
                    qos = ?message.qos,
                    retain = message.retain,
                    bytes = message.payload.len(),
                    "Received MQTT message"
                );
                self.channels.emit(SessionEvent::MessageReceived(message));
                true
            }
            EventRoute::Disconnected => {
                self.handle_connection_lost(ConnectionEvent::DisconnectedByBroker, event_loop)
                    .await
            }
            EventRoute::DisconnectSent => {
                self.channels.transition(ConnectionEvent::ClientDisconnected);
                let lost = self.inner.lock().await.drain_pending();
                self.channels.report_lost(lost);
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                match MessageHandler::validate_subscription_success(&granted) {
                    Ok(()) => info!(packet_id = packet_id, granted = ?granted, "Subscription confirmed"),
                    Err(reason) => {
                        error!(packet_id = packet_id, "{}", reason);
                        self.channels.emit(SessionEvent::TransportError { reason });
                    }
                }
                self.channels
                    .emit(SessionEvent::SubscribeAcknowledged { packet_id, granted });
                true
            }
            EventRoute::PublishSent { packet_id } => {
                self.on_publish_sent(packet_id).await;
                true
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                let acknowledged = self.inner.lock().await.inflight.remove(&packet_id);
                match acknowledged {
                    Some(pending) => {
                        debug!(
                            correlation_id = pending.correlation_id,
                            packet_id = packet_id,
                            topic = %pending.topic,
                            "Publish acknowledged"
                        );
                        self.channels.emit(SessionEvent::Acknowledged {
                            correlation_id: pending.correlation_id,
                            packet_id,
                        });
                    }
                    None => debug!(packet_id = packet_id, "Acknowledgement for unknown packet"),
                }
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// ConnAck: publish the birth message, then re-apply every subscription
    async fn on_connected(&mut self, session_present: bool) {
        self.channels.transition(ConnectionEvent::ConnAckReceived);
        self.attempts = 0;

        let mut inner = self.inner.lock().await;
        if inner.stats.ever_connected {
            inner.stats.reconnect_count += 1;
        }
        inner.stats.ever_connected = true;
        inner.stats.connect_time = Some(Instant::now());

        let link_ready = self.link.as_ref().map_or(true, LinkReadiness::is_ready);
        match &self.settings.birth_message {
            Some(_) if !link_ready => {
                warn!("Network link lost before ConnAck, online status not published");
            }
            Some(birth) => {
                match inner.enqueue_publish(&birth.topic, birth.payload.clone(), birth.qos, birth.retain) {
                    Ok(correlation_id) => info!(
                        topic = %birth.topic,
                        correlation_id = correlation_id,
                        "Published online status"
                    ),
                    Err(e) => {
                        error!(topic = %birth.topic, "Failed to publish online status: {}", e);
                        self.channels.emit(SessionEvent::TransportError {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            None => {}
        }

        let Some(client) = inner.client.as_ref() else {
            return;
        };
        for subscription in inner.subscriptions.iter() {
            match client.try_subscribe(subscription.filter.as_str(), subscription.qos) {
                Ok(()) => info!(
                    filter = %subscription.filter,
                    qos = ?subscription.qos,
                    session_present = session_present,
                    "Subscribed"
                ),
                Err(e) => {
                    error!(filter = %subscription.filter, "Failed to subscribe: {}", e);
                    self.channels.emit(SessionEvent::TransportError {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn on_publish_sent(&self, packet_id: u16) {
        let mut inner = self.inner.lock().await;
        let Some(pending) = inner.queued.pop_front() else {
            debug!(packet_id = packet_id, "Outgoing publish without a queued request");
            return;
        };

        debug!(
            correlation_id = pending.correlation_id,
            packet_id = packet_id,
            topic = %pending.topic,
            qos = ?pending.qos,
            "Publish sent"
        );
        self.channels.emit(SessionEvent::Published {
            correlation_id: pending.correlation_id,
            topic: pending.topic.clone(),
            qos: pending.qos,
        });
        if pending.qos != QoS::AtMostOnce {
            inner.inflight.insert(packet_id, pending);
        }
    }

    /// Record the loss, report stranded publishes, then decide on reconnection
    async fn handle_connection_lost(
        &mut self,
        event: ConnectionEvent,
        event_loop: &mut EventLoop,
    ) -> bool {
        let reason = match &event {
            ConnectionEvent::NetworkError(reason) => reason.clone(),
            ConnectionEvent::DisconnectedByBroker => "broker closed the connection".to_string(),
            other => format!("{other:?}"),
        };

        let previous = self.channels.state();
        self.channels.transition(event);

        let lost = {
            let mut inner = self.inner.lock().await;
            inner.client = None;
            inner.stats.connect_time = None;
            inner.drain_pending()
        };
        self.channels.report_lost(lost);

        if self.closing.load(Ordering::SeqCst) {
            info!("Connection closed during shutdown");
            return false;
        }

        if previous == SessionState::Connected {
            error!(reason = %reason, "MQTT event loop error");
        } else {
            warn!(reason = %reason, "MQTT connection attempt failed");
        }
        self.channels.emit(SessionEvent::TransportError { reason });

        self.reconnect(event_loop).await
    }

    async fn reconnect(&mut self, event_loop: &mut EventLoop) -> bool {
        let shutdown_requested = self.closing.load(Ordering::SeqCst) || *self.shutdown_rx.borrow();
        let decision = HealthMonitor::should_attempt_reconnection(
            self.attempts,
            &self.settings.reconnect_config,
            shutdown_requested,
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.attempts = attempt;
                let max_display = self
                    .settings
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                if !self.wait_for_link().await {
                    return false;
                }
                if self.closing.load(Ordering::SeqCst) || *self.shutdown_rx.borrow() {
                    info!("Shutdown signal received, aborting reconnection");
                    return false;
                }

                self.channels
                    .transition(ConnectionEvent::ReconnectionStarted(attempt));
                self.apply_new_connection(event_loop).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!("Max reconnection attempts ({}) exceeded", self.attempts);
                self.channels
                    .transition(ConnectionEvent::PermanentFailure(reason.clone()));
                self.channels.emit(SessionEvent::TransportError { reason });
                false
            }
        }
    }

    /// Hold reconnection while the link is down; false on shutdown
    async fn wait_for_link(&self) -> bool {
        let Some(link) = &self.link else {
            return true;
        };
        if link.is_ready() {
            return true;
        }

        info!("Network link down, waiting for readiness before reconnecting");
        let mut link = link.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            ready = link.ready() => ready,
            _ = shutdown_rx.wait_for(|stop| *stop) => false,
        }
    }

    async fn apply_new_connection(&self, event_loop: &mut EventLoop) -> bool {
        match self.settings.create_connection() {
            Ok((client, new_event_loop)) => {
                *event_loop = new_event_loop;
                self.inner.lock().await.client = Some(client);
                debug!("Created new connection for reconnection attempt");
                true
            }
            Err(e) => {
                error!("Failed to create new connection: {}", e);
                self.channels
                    .transition(ConnectionEvent::PermanentFailure(e.to_string()));
                false
            }
        }
    }
}

/// Sleep unless shutdown is signalled first
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
