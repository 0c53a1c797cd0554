//! Node lifecycle management
//!
//! Once the session is Connected the lifecycle starts the background tasks
//! (metrics observer, command dispatcher, optional heartbeat), runs the
//! telemetry publisher and then keeps serving commands until shutdown.

use crate::command::CommandDispatcher;
use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::observability::metrics::NodeMetrics;
use crate::protocol::{encode_payload, LifecycleStatus, StatusReport};
use crate::telemetry::{PublishRun, TelemetryPublisher};
use crate::transport::mqtt::SessionState;
use crate::transport::{SessionEvent, Transport};
use rumqttc::QoS;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Node lifecycle with an injected transport
pub struct NodeLifecycle<T>
where
    T: Transport + 'static,
{
    config: NodeConfig,
    transport: Arc<T>,
    metrics: Arc<NodeMetrics>,
    shutdown_tx: watch::Sender<bool>,
    observer_handle: Option<JoinHandle<()>>,
    dispatcher_handle: Option<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
    publisher_handle: Option<JoinHandle<NodeResult<PublishRun>>>,
}

impl<T> NodeLifecycle<T>
where
    T: Transport + 'static,
{
    pub fn new(config: NodeConfig, transport: Arc<T>, metrics: Arc<NodeMetrics>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            transport,
            metrics,
            shutdown_tx,
            observer_handle: None,
            dispatcher_handle: None,
            heartbeat_handle: None,
            publisher_handle: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    // ========== PURE HELPER FUNCTIONS ==========

    /// `{"status":"offline"}`, the same record the broker sends as last will
    pub fn offline_payload() -> NodeResult<Vec<u8>> {
        encode_payload(&LifecycleStatus::offline())
            .map_err(|e| NodeError::TransportError(e.to_string()))
    }

    fn heartbeat_payload(report: &StatusReport) -> Option<Vec<u8>> {
        encode_payload(report).ok()
    }

    // ========== TASKS ==========

    /// Fold session events into the node metrics
    fn spawn_metrics_observer(
        transport: &Arc<T>,
        metrics: Arc<NodeMetrics>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut events = transport.events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,
                    received = events.recv() => match received {
                        Ok(event) => metrics.observe_session_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped = skipped, "Metrics observer lagged behind session events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Republish the status record at a fixed interval
    fn spawn_heartbeat_task(
        transport: Arc<T>,
        metrics: Arc<NodeMetrics>,
        status_topic: String,
        interval_secs: u64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await; // First tick completes immediately, skip it

            loop {
                tokio::select! {
                    _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,
                    _ = interval.tick() => {}
                }

                if transport.session_state() != SessionState::Connected {
                    debug!("Heartbeat skipped, session not connected");
                    continue;
                }

                let report = metrics.status_report();
                let Some(payload) = Self::heartbeat_payload(&report) else {
                    continue;
                };
                match transport
                    .publish(&status_topic, payload, QoS::AtMostOnce, false)
                    .await
                {
                    Ok(_) => info!(
                        uptime_s = report.uptime_s,
                        publish_count = report.publish_count,
                        "Heartbeat: Published status"
                    ),
                    // Continue anyway - don't kill the heartbeat on errors
                    Err(e) => error!(error = %e, "Heartbeat: Failed to publish status"),
                }
            }
        })
    }

    /// Start the observer, dispatcher and heartbeat tasks
    pub fn start(&mut self) {
        info!(device_id = %self.config.device.id, "Starting node lifecycle");

        if self.transport.session_state() == SessionState::Connected {
            // Connected before the observer subscribed
            self.metrics.observe_session_event(&SessionEvent::StateChanged {
                from: SessionState::Connecting,
                to: SessionState::Connected,
            });
        }
        self.observer_handle = Some(Self::spawn_metrics_observer(
            &self.transport,
            self.metrics.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let dispatcher = CommandDispatcher::new(
            self.transport.clone(),
            &self.config.topics,
            self.metrics.clone(),
        );
        self.dispatcher_handle = Some(dispatcher.spawn(self.shutdown_tx.subscribe()));

        let heartbeat_interval = self.config.mqtt.heartbeat_interval_secs;
        if heartbeat_interval > 0 {
            self.heartbeat_handle = Some(Self::spawn_heartbeat_task(
                self.transport.clone(),
                self.metrics.clone(),
                self.config.topics.status.clone(),
                heartbeat_interval,
                self.shutdown_tx.subscribe(),
            ));
            info!(interval_secs = heartbeat_interval, "Heartbeat task started");
        }
    }

    /// Launch the telemetry publisher built from the configuration
    pub fn start_publisher(&mut self) {
        let publisher =
            TelemetryPublisher::from_config(self.transport.clone(), &self.config, self.metrics.clone());
        self.spawn_publisher(publisher);
    }

    pub fn spawn_publisher(&mut self, mut publisher: TelemetryPublisher<T>) {
        self.publisher_handle = Some(tokio::spawn(async move { publisher.run().await }));
    }

    /// Run until `shutdown` resolves or a fatal error occurs
    ///
    /// A fatal publisher failure or a session that gives up reconnecting ends
    /// the run with an error. A publisher that completes, or stops on a
    /// recoverable error, leaves the node serving commands.
    pub async fn run_until<S>(&mut self, shutdown: S) -> NodeResult<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Some(publisher) = self.publisher_handle.as_mut() {
            let joined = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested while publishing");
                    return Ok(());
                }
                joined = publisher => joined,
            };
            self.publisher_handle = None;

            match joined {
                Ok(Ok(run)) => info!(
                    total_published = run.total_published,
                    cycles_published = run.cycles_published,
                    cycles_skipped = run.cycles_skipped.len(),
                    "Publishing finished, still serving commands"
                ),
                Ok(Err(e)) if e.is_fatal() => {
                    error!("Telemetry publisher failed: {}", e);
                    return Err(e);
                }
                Ok(Err(e)) => warn!("Telemetry publisher stopped early, still serving commands: {}", e),
                Err(e) => return Err(NodeError::TransportError(format!("publisher task: {e}"))),
            }
        }

        let mut state_rx = self.transport.state_watch();
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
            Ok(_) = state_rx.wait_for(|state| *state == SessionState::Error) => {
                error!("MQTT session permanently failed, stopping node");
                Err(NodeError::TransportError("reconnection abandoned".to_string()))
            }
        }
    }

    /// Announce offline, stop every task and disconnect
    pub async fn shutdown(&mut self) -> NodeResult<()> {
        info!(device_id = %self.config.device.id, "Shutting down node");

        if let Some(handle) = self.publisher_handle.take() {
            handle.abort();
        }

        if self.transport.session_state() == SessionState::Connected {
            match self
                .transport
                .publish(
                    &self.config.topics.status,
                    Self::offline_payload()?,
                    QoS::AtLeastOnce,
                    true,
                )
                .await
            {
                Ok(correlation_id) => info!(correlation_id = correlation_id, "Published offline status"),
                Err(e) => warn!("Failed to publish offline status: {}", e),
            }
        }

        self.shutdown_tx.send_replace(true);
        for handle in [
            self.heartbeat_handle.take(),
            self.dispatcher_handle.take(),
            self.observer_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            Self::stop_task(handle).await;
        }

        self.transport.disconnect().await?;
        info!("Node shutdown complete");
        Ok(())
    }

    async fn stop_task(mut handle: JoinHandle<()>) {
        match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if !e.is_cancelled() => error!("Task shutdown error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}
