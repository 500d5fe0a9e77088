//! Supervisor behaviour tests
//!
//! Reconnect scheduling, heartbeat cadence, the one-shot startup command and
//! clean shutdown, all against mock transports on a paused clock.

mod test_helpers;

use ble2mqtt::link::{attempt_connect, LinkDriver, LinkState};
use ble2mqtt::protocol::{Component, LivenessRecord, LivenessState};
use ble2mqtt::testing::PublishedMessage;
use serde_json::json;
use std::sync::Arc;
use test_helpers::*;
use tokio::sync::watch;

fn startup_frame() -> Vec<u8> {
    let mut frame = vec![0x00, 0x0a];
    frame.extend(serde_json::to_vec(&json!({"pincode": 1234})).unwrap());
    frame
}

fn count_state(published: &[PublishedMessage], state: LivenessState) -> usize {
    published
        .iter()
        .filter(|m| m.retain && LivenessRecord::parse_state(&m.payload).ok() == Some(state))
        .count()
}

async fn wait_for_wireless(harness: &Harness, connected: bool) {
    for _ in 0..200 {
        if harness.supervisor.wireless().handle().is_connected() == connected {
            return;
        }
        settle().await;
    }
    panic!("wireless link never reached connected={connected}");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_republishes_online_while_connected() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;

    let ble_topic = format!("{BASE_TOPIC}/{SERIAL}/state/ble");
    let mqtt_topic = format!("{BASE_TOPIC}/{SERIAL}/state/mqtt");
    assert_eq!(
        count_state(&h.broker.published_on(&ble_topic).await, LivenessState::Online),
        1,
        "transition publishes exactly one online record"
    );

    // Beats at t=0, 30 and 60 within 65 seconds
    let heartbeat = h.supervisor.spawn_heartbeat();
    settle_ms(65_000).await;
    heartbeat.abort();

    let ble = h.broker.published_on(&ble_topic).await;
    assert_eq!(count_state(&ble, LivenessState::Online), 4);
    assert_eq!(count_state(&ble, LivenessState::Offline), 0);

    let mqtt = h.broker.published_on(&mqtt_topic).await;
    assert_eq!(count_state(&mqtt, LivenessState::Online), 4);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_skips_links_that_are_down() {
    let h = harness(&test_config_without_startup());
    assert_eq!(h.supervisor.heartbeat_once().await, 0);

    assert!(attempt_connect(Arc::clone(h.supervisor.broker())).await);
    h.broker.clear_history().await;

    // Broker up, wireless never started
    assert_eq!(h.supervisor.heartbeat_once().await, 1);
    let published = h.broker.get_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, format!("{BASE_TOPIC}/{SERIAL}/state/mqtt"));
}

#[tokio::test(start_paused = true)]
async fn test_startup_command_sent_once_across_reconnects() {
    let h = harness(&test_config());
    assert!(h.supervisor.wireless().startup_pending());

    connect_both(&h).await;
    assert_eq!(h.wireless.get_writes().await, vec![startup_frame()]);
    assert!(!h.supervisor.wireless().startup_pending());

    for _ in 0..3 {
        // Peer goes away, the supervisor brings the link back
        h.wireless.end_notifications().await;
        wait_for_wireless(&h, false).await;

        let report = h.supervisor.tick().await;
        assert!(report.wireless_attempt);
        wait_for_wireless(&h, true).await;
    }

    assert_eq!(h.wireless.connect_count(), 4);
    assert_eq!(
        h.wireless.get_writes().await.len(),
        1,
        "startup command must not be repeated on reconnect"
    );
}

#[tokio::test(start_paused = true)]
async fn test_startup_command_retried_until_written() {
    let h = harness(&test_config());
    assert!(attempt_connect(Arc::clone(h.supervisor.broker())).await);

    h.wireless.set_fail_write(true);
    assert!(h.supervisor.tick().await.wireless_attempt);
    settle_ms(50).await;

    assert_ne!(h.supervisor.wireless().handle().state(), LinkState::Connected);
    assert!(h.supervisor.wireless().startup_pending());
    assert!(h.wireless.get_writes().await.is_empty());

    h.wireless.set_fail_write(false);
    wait_for_wireless(&h, true).await;

    assert_eq!(h.wireless.get_writes().await, vec![startup_frame()]);
    assert!(!h.supervisor.wireless().startup_pending());
    assert!(h.wireless.connect_count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_reconnects_within_one_tick() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;

    h.wireless.set_fail_write(true);
    let result = h.supervisor.wireless().write(&[0x00, 0x02]).await;
    assert!(result.is_err());
    assert_eq!(
        h.supervisor.wireless().handle().state(),
        LinkState::Disconnected
    );
    assert!(h.supervisor.wireless().handle().needs_reconnect());

    h.wireless.set_fail_write(false);
    let report = h.supervisor.tick().await;
    assert!(report.wireless_attempt, "next tick must start a reconnect");
    assert!(!report.broker_attempt);

    wait_for_wireless(&h, true).await;
    assert_eq!(h.wireless.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_broker_failure_leaves_wireless_connected() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;

    h.broker.set_fail_pump(true);
    let report = h.supervisor.tick().await;
    assert!(report.inbound.is_none());
    assert_eq!(h.supervisor.broker().handle().state(), LinkState::Disconnected);
    assert!(h.supervisor.wireless().handle().is_connected());

    h.broker.set_fail_pump(false);
    let report = h.supervisor.tick().await;
    assert!(report.broker_attempt);
    assert!(!report.wireless_attempt);

    settle().await;
    assert!(h.supervisor.broker().handle().is_connected());
    assert_eq!(h.broker.connect_count().await, 2);

    let control = format!("{BASE_TOPIC}/control/{SERIAL}");
    let subscriptions = h.broker.get_subscriptions().await;
    assert_eq!(subscriptions, vec![control.clone(), control]);
}

#[tokio::test(start_paused = true)]
async fn test_tick_skips_connected_and_busy_links() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;

    let report = h.supervisor.tick().await;
    assert!(!report.broker_attempt);
    assert!(!report.wireless_attempt);
    assert_eq!(h.broker.connect_count().await, 1);
    assert_eq!(h.wireless.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown_publishes_offline() {
    let h = harness(&test_config_without_startup());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stop = async {
        settle_ms(3_000).await;
        assert!(h.supervisor.broker().handle().is_connected());
        assert!(h.supervisor.wireless().handle().is_connected());
        shutdown_tx.send(true).unwrap();
    };
    tokio::join!(h.supervisor.run(shutdown_rx), stop);

    for component in [Component::Ble, Component::Mqtt] {
        let topic = format!("{BASE_TOPIC}/{SERIAL}/state/{component}");
        let records = h.broker.published_on(&topic).await;
        let last = records.last().expect("liveness record published");
        assert!(last.retain);
        assert_eq!(
            LivenessRecord::parse_state(&last.payload).unwrap(),
            LivenessState::Offline
        );
    }

    assert_eq!(h.supervisor.broker().handle().state(), LinkState::Disconnected);
    assert_eq!(h.supervisor.wireless().handle().state(), LinkState::Disconnected);
    assert!(h.broker.disconnect_count() >= 1);
    assert!(h.wireless.disconnect_count() >= 1);
}
