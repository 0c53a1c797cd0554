//! Health check HTTP server
//!
//! Provides HTTP endpoints for monitoring node status, supporting both
//! human operators and container orchestration platforms.

use crate::link::{LinkReadiness, LinkState};
use crate::observability::metrics::{MetricsSnapshot, NodeMetrics};
use crate::transport::mqtt::{HealthMetrics, MqttSession, SessionState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    device_id: String,
    port: u16,
    metrics: Arc<NodeMetrics>,
    session_state: watch::Receiver<SessionState>,
    link: Option<LinkReadiness>,
    session: Option<Arc<MqttSession>>,
}

impl HealthServer {
    pub fn new(
        device_id: String,
        port: u16,
        metrics: Arc<NodeMetrics>,
        session_state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            device_id,
            port,
            metrics,
            session_state,
            link: None,
            session: None,
        }
    }

    /// Include link state in `/health`
    pub fn with_link(mut self, link: LinkReadiness) -> Self {
        self.link = Some(link);
        self
    }

    /// Report connection uptime, reconnects and inbound activity
    pub fn with_session(mut self, session: Arc<MqttSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Start the HTTP health server; runs until the task is dropped
    pub async fn start(self: Arc<Self>) {
        let health_server = self.clone();
        let ready_server = self.clone();
        let metrics_server = self.clone();

        // GET /health - link, session and counters
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /ready - 200 only while the session is Connected
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let response = server.readiness();
                let code = if response.ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /metrics - counters export
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(move || {
            let server = metrics_server.clone();
            async move {
                let response = MetricsResponse {
                    snapshot: server.metrics.snapshot(),
                    connection: server.connection_health().await,
                };
                Ok::<_, Infallible>(warp::reply::json(&response))
            }
        });

        let routes = health_route.or(ready_route).or(metrics_route);

        tracing::info!(port = self.port, "Starting health server");
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    pub fn readiness(&self) -> ReadinessResponse {
        ReadinessResponse {
            ready: *self.session_state.borrow() == SessionState::Connected,
            timestamp: current_timestamp(),
        }
    }

    /// Session connection metrics, when a session is attached
    pub async fn connection_health(&self) -> Option<ConnectionHealth> {
        match &self.session {
            Some(session) => Some(ConnectionHealth::from(session.health_metrics().await)),
            None => None,
        }
    }

    pub async fn health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let mut checks = BTreeMap::new();
        checks.insert("mqtt".to_string(), self.check_session(now));
        if let Some(link) = &self.link {
            checks.insert("link".to_string(), check_link(link.state(), now));
        }

        let healthy = checks.values().all(|check| check.status == "healthy");
        let snapshot = self.metrics.snapshot();

        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            device_id: self.device_id.clone(),
            uptime_seconds: snapshot.uptime_seconds,
            publish_count: snapshot.telemetry.publish_count,
            commands_handled: snapshot.commands.handled,
            connection: self.connection_health().await,
            checks,
        }
    }

    fn check_session(&self, now: u64) -> HealthCheck {
        let state = *self.session_state.borrow();
        let status = if state == SessionState::Connected {
            "healthy"
        } else {
            "unhealthy"
        };
        HealthCheck {
            status: status.to_string(),
            message: Some(format!("MQTT session {state:?}")),
            last_check: now,
        }
    }
}

fn check_link(state: LinkState, now: u64) -> HealthCheck {
    let status = if state == LinkState::AddressAssigned {
        "healthy"
    } else {
        "unhealthy"
    };
    HealthCheck {
        status: status.to_string(),
        message: Some(format!("Link {state:?}")),
        last_check: now,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub device_id: String,
    pub uptime_seconds: u64,
    pub publish_count: u64,
    pub commands_handled: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionHealth>,
    pub checks: BTreeMap<String, HealthCheck>,
}

/// Broker connection health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionHealth {
    pub uptime_seconds: Option<u64>,
    pub reconnect_count: u32,
    pub seconds_since_last_message: Option<u64>,
}

impl From<HealthMetrics> for ConnectionHealth {
    fn from(metrics: HealthMetrics) -> Self {
        Self {
            uptime_seconds: metrics.uptime.map(|uptime| uptime.as_secs()),
            reconnect_count: metrics.reconnect_count,
            seconds_since_last_message: metrics.time_since_last_message.map(|idle| idle.as_secs()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionHealth>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
