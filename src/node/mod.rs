//! Device bring-up and the running node
//!
//! Startup order mirrors the firmware: bring the link up and wait for an
//! address, let the network settle, connect to the broker (falling back to
//! the secondary broker once), then hand the Connected session to the
//! [`NodeLifecycle`].

pub mod lifecycle;

pub use lifecycle::NodeLifecycle;

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::link::{HostLinkDriver, LinkManager, LinkReadiness};
use crate::observability::health::HealthServer;
use crate::observability::metrics::NodeMetrics;
use crate::protocol::{encode_payload, LifecycleStatus};
use crate::transport::mqtt::{parse_broker_url, MqttError, MqttSession, SessionOptions};
use crate::transport::{Message, Transport};
use rumqttc::{LastWill, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Session options for `broker_url`: offline last will, online birth
/// message, control subscription (QoS 1) and telemetry wildcard (QoS 0)
pub fn session_options(config: &NodeConfig, broker_url: &str) -> NodeResult<SessionOptions> {
    let encode = |status: LifecycleStatus| {
        encode_payload(&status).map_err(|e| NodeError::TransportError(e.to_string()))
    };
    let status_topic = config.topics.status.as_str();

    Ok(
        SessionOptions::new(&config.device.id, broker_url, config.mqtt.clone())
            .with_last_will(LastWill::new(
                status_topic,
                encode(LifecycleStatus::offline())?,
                QoS::AtLeastOnce,
                true,
            ))
            .with_birth_message(Message::new(
                status_topic,
                encode(LifecycleStatus::online())?,
                QoS::AtLeastOnce,
                true,
            ))
            .with_subscription(&config.topics.commands, QoS::AtLeastOnce)
            .with_subscription(&config.topics.telemetry_filter(), QoS::AtMostOnce),
    )
}

/// Start the host link and wait for an address, then the settle delay
pub async fn bring_up_link(config: &NodeConfig) -> NodeResult<LinkManager> {
    let broker = parse_broker_url(&config.mqtt.broker_url)?;
    let driver = HostLinkDriver::new(
        &broker.host,
        broker.port,
        Duration::from_secs(config.link.probe_interval_secs.max(1)),
    );

    let mut manager = LinkManager::new(Box::new(driver));
    manager.start()?;

    info!("Waiting for IP address...");
    let address = manager.await_ready(config.link.ready_timeout()).await?;
    info!(ip = %address.ip, "Network ready");

    tokio::time::sleep(config.link.settle_delay()).await;
    Ok(manager)
}

/// Connect to the primary broker, then once to the fallback
///
/// Each broker gets the configured connect timeout. Failing both is fatal.
pub async fn connect_with_fallback(
    config: &NodeConfig,
    link: Option<LinkReadiness>,
) -> NodeResult<MqttSession> {
    let timeout = Duration::from_secs(config.mqtt.connect_timeout_secs);
    let brokers = std::iter::once(config.mqtt.broker_url.as_str())
        .chain(config.mqtt.fallback_broker_url.as_deref());

    let mut last_error = None;
    for broker_url in brokers {
        let mut session = MqttSession::new(session_options(config, broker_url)?)?;
        if let Some(link) = &link {
            session = session.with_link(link.clone());
        }

        session.connect().await?;
        match session.wait_connected(timeout).await {
            Ok(()) => {
                info!(broker_url = %broker_url, "MQTT connected to broker");
                return Ok(session);
            }
            Err(e) => {
                warn!(broker_url = %broker_url, "Broker connection failed: {}", e);
                if let Err(stop_error) = session.disconnect().await {
                    warn!("Failed to stop abandoned session: {}", stop_error);
                }
                last_error = Some(e);
            }
        }
    }

    Err(initial_connect_error(last_error, timeout))
}

fn initial_connect_error(error: Option<MqttError>, timeout: Duration) -> NodeError {
    match error {
        Some(MqttError::ConnectTimeout(after)) => NodeError::BrokerConnectTimeout(after),
        Some(other) => NodeError::BrokerConnectFailed(other.to_string()),
        None => NodeError::BrokerConnectTimeout(timeout),
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                return;
            }
            _ => warn!("Failed to install signal handlers, falling back to Ctrl-C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down gracefully...");
}

/// Full device lifecycle: link, session, publishing, commands, shutdown
pub async fn run_node(config: NodeConfig) -> NodeResult<()> {
    info!(device_id = %config.device.id, "Node starting");
    let metrics = Arc::new(NodeMetrics::new());

    let mut link = bring_up_link(&config).await?;
    let session = Arc::new(connect_with_fallback(&config, Some(link.readiness())).await?);

    if let Some(port) = config.health.port {
        let health_server = Arc::new(
            HealthServer::new(
                config.device.id.clone(),
                port,
                metrics.clone(),
                session.state_watch(),
            )
            .with_link(link.readiness())
            .with_session(session.clone()),
        );
        tokio::spawn(health_server.start());
    }

    let mut node = NodeLifecycle::new(config, session, metrics);
    node.start();
    node.start_publisher();

    let result = node.run_until(shutdown_signal()).await;
    let shutdown = node.shutdown().await;
    link.stop();

    result.and(shutdown)
}
