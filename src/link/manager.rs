//! Link state machine and readiness signal

use super::{AddressInfo, LinkDriver, LinkError, LinkEvent, LinkState, LinkStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Compute the link status that follows `event` (pure function)
pub fn next_status(current: &LinkStatus, event: &LinkEvent) -> LinkStatus {
    match event {
        LinkEvent::Started => LinkStatus {
            state: match current.state {
                LinkState::Down => LinkState::Starting,
                other => other,
            },
            address: current.address.clone(),
            failure: None,
        },
        LinkEvent::Connected => LinkStatus {
            state: match current.state {
                LinkState::Down | LinkState::Starting => LinkState::Up,
                other => other,
            },
            address: current.address.clone(),
            failure: None,
        },
        LinkEvent::AddressAssigned(info) => LinkStatus {
            state: LinkState::AddressAssigned,
            address: Some(info.clone()),
            failure: None,
        },
        LinkEvent::Disconnected | LinkEvent::Stopped => LinkStatus::down(),
        LinkEvent::Failed(reason) => LinkStatus {
            state: LinkState::Down,
            address: None,
            failure: Some(reason.clone()),
        },
    }
}

/// Read-only view of link readiness handed to other components
#[derive(Debug, Clone)]
pub struct LinkReadiness {
    rx: watch::Receiver<LinkStatus>,
}

impl LinkReadiness {
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_ready()
    }

    pub fn state(&self) -> LinkState {
        self.rx.borrow().state
    }

    pub fn address(&self) -> Option<AddressInfo> {
        self.rx.borrow().address.clone()
    }

    /// Resolve once the link is ready; false if the manager is gone
    pub async fn ready(&mut self) -> bool {
        self.rx.wait_for(|status| status.is_ready()).await.is_ok()
    }
}

/// Drives link bring-up and owns the [`LinkState`]
pub struct LinkManager {
    status_tx: Arc<watch::Sender<LinkStatus>>,
    driver: Option<Box<dyn LinkDriver>>,
    processor_handle: Option<JoinHandle<()>>,
    driver_handle: Option<JoinHandle<()>>,
}

impl LinkManager {
    pub fn new(driver: Box<dyn LinkDriver>) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::down());
        Self {
            status_tx: Arc::new(status_tx),
            driver: Some(driver),
            processor_handle: None,
            driver_handle: None,
        }
    }

    /// Start link bring-up
    ///
    /// Spawns the driver and a dedicated task that applies its events in
    /// arrival order.
    pub fn start(&mut self) -> Result<(), LinkError> {
        let driver = self.driver.take().ok_or(LinkError::AlreadyStarted)?;
        let (event_tx, mut event_rx) = mpsc::channel::<LinkEvent>(16);

        let status_tx = self.status_tx.clone();
        self.processor_handle = Some(tokio::spawn(
            async move {
                while let Some(event) = event_rx.recv().await {
                    Self::apply_event(&status_tx, event);
                }
                debug!("Link event channel closed");
            }
            .instrument(crate::link_span!(role = "processor")),
        ));

        self.driver_handle = Some(tokio::spawn(
            async move {
                driver.run(event_tx).await;
            }
            .instrument(crate::link_span!(role = "driver")),
        ));

        info!("Link bring-up started");
        Ok(())
    }

    /// Apply a link event directly
    pub fn handle_event(&self, event: LinkEvent) {
        Self::apply_event(&self.status_tx, event);
    }

    fn apply_event(status_tx: &watch::Sender<LinkStatus>, event: LinkEvent) {
        let current = status_tx.borrow().clone();
        let next = next_status(&current, &event);
        Self::log_event(&current, &next, &event);
        status_tx.send_replace(next);
    }

    fn log_event(from: &LinkStatus, to: &LinkStatus, event: &LinkEvent) {
        match event {
            LinkEvent::Started => info!("Link started"),
            LinkEvent::Connected => info!("Link up"),
            LinkEvent::Stopped => info!("Link stopped"),
            LinkEvent::Disconnected => warn!(from = ?from.state, "Link down, readiness cleared"),
            LinkEvent::AddressAssigned(address) => info!(
                ip = %address.ip,
                gateway = ?address.gateway,
                netmask = ?address.netmask,
                "Got IP address"
            ),
            LinkEvent::Failed(reason) => error!(reason = %reason, "Link failure"),
        }
        if from.state != to.state {
            debug!(from = ?from.state, to = ?to.state, "Link state transition");
        }
    }

    pub fn state(&self) -> LinkState {
        self.status_tx.borrow().state
    }

    pub fn status(&self) -> LinkStatus {
        self.status_tx.borrow().clone()
    }

    pub fn readiness(&self) -> LinkReadiness {
        LinkReadiness {
            rx: self.status_tx.subscribe(),
        }
    }

    /// Wait until an address is assigned
    ///
    /// Fails with [`LinkError::Timeout`] once `timeout` elapses and with
    /// [`LinkError::Failure`] if the driver reports a hard error.
    pub async fn await_ready(&self, timeout: Duration) -> Result<AddressInfo, LinkError> {
        let mut rx = self.status_tx.subscribe();
        wait_for_address(&mut rx, timeout).await
    }

    /// Stop the driver and the event processor
    pub fn stop(&mut self) {
        if let Some(handle) = self.driver_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.processor_handle.take() {
            handle.abort();
        }
        Self::apply_event(&self.status_tx, LinkEvent::Stopped);
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        if let Some(handle) = self.driver_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.processor_handle.take() {
            handle.abort();
        }
    }
}

async fn wait_for_address(
    rx: &mut watch::Receiver<LinkStatus>,
    timeout: Duration,
) -> Result<AddressInfo, LinkError> {
    let outcome = tokio::time::timeout(timeout, async {
        let status = rx
            .wait_for(|status| status.is_ready() || status.failure.is_some())
            .await
            .map_err(|_| LinkError::Failure("link status channel closed".to_string()))?;

        match (&status.failure, &status.address) {
            (Some(reason), _) => Err(LinkError::Failure(reason.clone())),
            (None, Some(address)) => Ok(address.clone()),
            (None, None) => Err(LinkError::Failure(
                "ready without address".to_string(),
            )),
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(LinkError::Timeout(timeout)),
    }
}
