//! Network link supervision tests
//!
//! Attempts are bounded, failures are reported and retried forever, and a
//! lost link takes the broker session down with it.


use motion_node::config::NetworkSection;
use motion_node::connectivity::{ConnectivityManager, ConnectivityState, LinkCredentials};
use motion_node::testing::{MockLink, MockTransport};
use test_helpers::{control_loop, test_config};

fn credentials() -> LinkCredentials {
    LinkCredentials {
        ssid: "home-network".to_string(),
        password: Some("secret".to_string()),
    }
}

fn network(connect_timeout_ms: u64) -> NetworkSection {
    NetworkSection {
        connect_timeout_ms,
        attempt_interval_ms: 500,
        max_attempts: 15,
        retry_delay_ms: 5_000,
    }
}

fn manager(link: MockLink) -> ConnectivityManager<MockLink> {
    ConnectivityManager::new(link, credentials(), network(30_000))
}

#[test]
fn test_link_comes_up_after_polling() {
    let link = MockLink::new();
    link.up_after_polls(2);
    let mut manager = manager(link.clone());

    manager.tick(0);
    assert_eq!(manager.current_state(), ConnectivityState::Connecting);

    // Between polls the driver is left alone
    let polls_before = link.status_calls();
    manager.tick(100);
    assert_eq!(link.status_calls(), polls_before);

    manager.tick(500);
    assert_eq!(manager.current_state(), ConnectivityState::Connecting);
    manager.tick(1_000);
    assert_eq!(manager.current_state(), ConnectivityState::Connected);
    assert_eq!(manager.consecutive_failures(), 0);
}

#[test]
fn test_attempt_gives_up_after_max_attempts() {
    let link = MockLink::new();
    let mut manager = manager(link.clone());

    for now in (0..7_000).step_by(10) {
        manager.tick(now);
    }
    assert_eq!(manager.current_state(), ConnectivityState::Connecting);

    manager.tick(7_000);
    assert_eq!(manager.current_state(), ConnectivityState::Disconnected);
    assert_eq!(manager.consecutive_failures(), 1);
    assert_eq!(link.begin_calls(), 1);
}

#[test]
fn test_attempt_gives_up_after_timeout() {
    let link = MockLink::new();
    let mut manager = ConnectivityManager::new(link.clone(), credentials(), network(2_000));

    for now in (0..2_000).step_by(10) {
        manager.tick(now);
    }
    assert_eq!(manager.current_state(), ConnectivityState::Connecting);

    manager.tick(2_000);
    assert_eq!(manager.current_state(), ConnectivityState::Disconnected);
    assert_eq!(manager.consecutive_failures(), 1);
}

#[test]
fn test_failed_attempt_retried_after_delay() {
    let link = MockLink::new();
    link.fail_association();
    let mut manager = manager(link.clone());

    manager.tick(0);
    assert_eq!(manager.current_state(), ConnectivityState::Disconnected);
    assert_eq!(link.begin_calls(), 1);

    manager.tick(4_999);
    assert_eq!(link.begin_calls(), 1);

    manager.tick(5_000);
    assert_eq!(link.begin_calls(), 2);
    assert_eq!(manager.consecutive_failures(), 2);
}

#[test]
fn test_retries_forever() {
    let link = MockLink::new();
    link.reject_begin(true);
    let mut manager = manager(link.clone());

    for cycle in 0..100u64 {
        manager.tick(cycle * 5_000);
    }
    assert_eq!(link.begin_calls(), 100);
    assert_eq!(manager.consecutive_failures(), 100);

    link.reject_begin(false);
    link.up_after_polls(0);
    manager.tick(500_000);
    assert_eq!(manager.current_state(), ConnectivityState::Connected);
    assert_eq!(manager.consecutive_failures(), 0);
}

#[test]
fn test_stale_association_dropped_before_each_attempt() {
    let link = MockLink::new();
    link.fail_association();
    let mut manager = manager(link.clone());

    manager.tick(0);
    manager.tick(5_000);

    // One disconnect ahead of each begin, one after each failure
    assert_eq!(link.disconnect_calls(), 4);
}

#[test]
fn test_state_changes_observable_through_watch() {
    let link = MockLink::new();
    link.up_after_polls(0);
    let mut manager = manager(link.clone());
    let mut rx = manager.subscribe();

    manager.tick(0);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), ConnectivityState::Connected);

    link.drop_link();
    manager.tick(10);
    assert_eq!(*rx.borrow_and_update(), ConnectivityState::Disconnected);

    manager.tick(20);
    assert_eq!(*rx.borrow_and_update(), ConnectivityState::Connected);
}

#[test]
fn test_link_loss_tears_down_broker_session() {
    let link = MockLink::new();
    link.up_after_polls(0);
    let transport = MockTransport::with_auto_connack();
    let mut node = control_loop(&test_config(), link.clone(), transport.clone());

    node.run_iteration(0);
    node.run_iteration(10);
    assert!(node.messaging().is_connected());

    link.drop_link();
    node.run_iteration(20);

    assert!(!node.messaging().is_connected());
    assert!(!transport.is_open());
    assert_eq!(node.messaging().retry_count(), 0);

    // Link returns on the next tick and a fresh session follows
    node.run_iteration(30);
    node.run_iteration(40);
    assert!(node.messaging().is_connected());
    assert_eq!(transport.open_calls(), 2);
}
