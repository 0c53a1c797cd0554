//! Network link bring-up
//!
//! The [`LinkManager`] turns link-layer signals (started, connected,
//! disconnected, address assigned) into a [`LinkState`] and a readiness
//! signal that the messaging session waits on before connecting.
//!
//! - [`manager`] - state transitions and the readiness wait
//! - [`driver`] - sources of link events (the host network stack)

pub mod driver;
pub mod manager;

pub use driver::{HostLinkDriver, LinkDriver};
pub use manager::{next_status, LinkManager, LinkReadiness};

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Link bring-up state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Starting,
    Up,
    /// Terminal ready state consumed by the session layer
    AddressAssigned,
}

/// Address information reported with an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub ip: IpAddr,
    pub gateway: Option<IpAddr>,
    pub netmask: Option<IpAddr>,
}

impl AddressInfo {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            gateway: None,
            netmask: None,
        }
    }
}

/// Signals raised by a link driver
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Started,
    Connected,
    Disconnected,
    Stopped,
    AddressAssigned(AddressInfo),
    /// Hard link-layer error; waiters fail with [`LinkError::Failure`]
    Failed(String),
}

/// Snapshot published on the link status channel
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub address: Option<AddressInfo>,
    pub failure: Option<String>,
}

impl LinkStatus {
    pub fn down() -> Self {
        Self {
            state: LinkState::Down,
            address: None,
            failure: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::AddressAssigned && self.address.is_some()
    }
}

/// Link bring-up errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    #[error("Link not ready within {0:?}")]
    Timeout(Duration),
    #[error("Link failure: {0}")]
    Failure(String),
    #[error("Link manager already started")]
    AlreadyStarted,
}
