//! Link bring-up integration tests
//!
//! Uses the scripted link driver with tokio's paused clock.

use sensornode::error::NodeError;
use sensornode::link::{AddressInfo, LinkError, LinkEvent, LinkManager, LinkState};
use sensornode::testing::ScriptedLinkDriver;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

fn address() -> AddressInfo {
    AddressInfo {
        ip: IpAddr::V4(Ipv4Addr::new(10, 0, 2, 15)),
        gateway: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 2, 2))),
        netmask: Some(IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0))),
    }
}

#[tokio::test(start_paused = true)]
async fn test_link_without_address_times_out() {
    // Driver gets the link up but never hands out an address
    let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::new(vec![
        (Duration::ZERO, LinkEvent::Started),
        (Duration::from_millis(200), LinkEvent::Connected),
    ])));
    manager.start().unwrap();

    let started = tokio::time::Instant::now();
    let result = manager.await_ready(Duration::from_secs(30)).await;

    assert_eq!(result, Err(LinkError::Timeout(Duration::from_secs(30))));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(manager.state(), LinkState::Up);

    let error = NodeError::from(result.unwrap_err());
    assert!(matches!(error, NodeError::LinkTimeout(_)));
    assert!(error.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_readiness_reports_assigned_address() {
    let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::bring_up(
        address(),
        Duration::from_secs(2),
    )));
    let readiness = manager.readiness();
    assert!(!readiness.is_ready());

    manager.start().unwrap();
    let assigned = manager.await_ready(Duration::from_secs(30)).await.unwrap();

    assert_eq!(assigned, address());
    assert!(readiness.is_ready());
    assert_eq!(readiness.address(), Some(address()));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_clears_readiness() {
    let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::new(vec![
        (Duration::ZERO, LinkEvent::Started),
        (Duration::ZERO, LinkEvent::Connected),
        (Duration::ZERO, LinkEvent::AddressAssigned(address())),
        (Duration::from_secs(10), LinkEvent::Disconnected),
        (Duration::from_secs(5), LinkEvent::Connected),
        (Duration::ZERO, LinkEvent::AddressAssigned(address())),
    ])));
    let mut readiness = manager.readiness();
    manager.start().unwrap();

    assert!(readiness.ready().await);

    // Disconnected at 10 s, reassigned at 15 s
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(!readiness.is_ready());
    assert_eq!(readiness.address(), None);

    // Comes back on the next assignment
    assert!(readiness.ready().await);
    assert_eq!(readiness.address(), Some(address()));
}

#[tokio::test(start_paused = true)]
async fn test_link_failure_fails_waiters() {
    let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::new(vec![
        (Duration::ZERO, LinkEvent::Started),
        (Duration::from_secs(1), LinkEvent::Failed("no carrier".to_string())),
    ])));
    manager.start().unwrap();

    let result = manager.await_ready(Duration::from_secs(30)).await;
    assert_eq!(result, Err(LinkError::Failure("no carrier".to_string())));
    assert!(NodeError::from(result.unwrap_err()).is_fatal());
}

#[tokio::test]
async fn test_manager_starts_once() {
    let mut manager = LinkManager::new(Box::new(ScriptedLinkDriver::new(vec![])));
    manager.start().unwrap();
    assert_eq!(manager.start(), Err(LinkError::AlreadyStarted));

    manager.stop();
    assert_eq!(manager.state(), LinkState::Down);
}
