//! Link drivers
//!
//! A driver brings the interface up and reports [`LinkEvent`]s until the
//! manager drops the receiving side of the channel.

use super::{AddressInfo, LinkEvent};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Source of link-layer signals
#[async_trait]
pub trait LinkDriver: Send {
    /// Bring the link up and report events; returns when `events` closes
    async fn run(self: Box<Self>, events: mpsc::Sender<LinkEvent>);
}

/// Uses the host network stack as the link
///
/// The link counts as up once a local address with a route to the broker
/// exists. The route is re-probed periodically so that losing it clears
/// readiness.
pub struct HostLinkDriver {
    broker_host: String,
    broker_port: u16,
    probe_interval: Duration,
}

impl HostLinkDriver {
    pub fn new(broker_host: &str, broker_port: u16, probe_interval: Duration) -> Self {
        Self {
            broker_host: broker_host.to_string(),
            broker_port,
            probe_interval,
        }
    }

    /// Local address the host would use to reach the broker
    pub async fn probe(&self) -> Option<IpAddr> {
        let target = match tokio::net::lookup_host((self.broker_host.as_str(), self.broker_port))
            .await
        {
            Ok(mut addresses) => addresses.next()?,
            Err(e) => {
                debug!(host = %self.broker_host, "Broker lookup failed: {}", e);
                return None;
            }
        };

        let bind_addr: SocketAddr = match target {
            SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
            SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
        };

        let socket = UdpSocket::bind(bind_addr).await.ok()?;
        // No datagram is sent; connect only selects a route and source address
        if let Err(e) = socket.connect(target).await {
            debug!(target = %target, "No route to broker: {}", e);
            return None;
        }
        socket.local_addr().ok().map(|addr| addr.ip())
    }
}

#[async_trait]
impl LinkDriver for HostLinkDriver {
    async fn run(self: Box<Self>, events: mpsc::Sender<LinkEvent>) {
        if events.send(LinkEvent::Started).await.is_err() {
            return;
        }

        let mut current: Option<IpAddr> = None;
        let mut interval = tokio::time::interval(self.probe_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let probed = self.probe().await;

            let outgoing = match (current, probed) {
                (None, Some(ip)) => vec![
                    LinkEvent::Connected,
                    LinkEvent::AddressAssigned(AddressInfo::new(ip)),
                ],
                (Some(old), Some(ip)) if old != ip => {
                    vec![LinkEvent::AddressAssigned(AddressInfo::new(ip))]
                }
                (Some(old), None) => {
                    warn!(ip = %old, "Route to broker lost");
                    vec![LinkEvent::Disconnected]
                }
                _ => Vec::new(),
            };
            current = probed;

            for event in outgoing {
                if events.send(event).await.is_err() {
                    debug!("Link event receiver closed, stopping host driver");
                    return;
                }
            }
        }
    }
}
