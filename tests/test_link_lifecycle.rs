//! Link lifecycle tests
//!
//! The connect loop on both concrete links: scanning, characteristic binding,
//! backoff growth and reset, and the busy flag that keeps attempts from
//! overlapping.

mod test_helpers;

use ble2mqtt::link::{attempt_connect, spawn_attempt, LinkDriver, LinkState};
use ble2mqtt::protocol::{Component, LivenessRecord};
use ble2mqtt::testing::{MockBroker, MockWireless};
use ble2mqtt::transport::Characteristic;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;

#[tokio::test(start_paused = true)]
async fn test_peer_not_found_retries_with_backoff_then_resets() {
    let h = harness(&test_config_without_startup());
    assert!(attempt_connect(Arc::clone(h.supervisor.broker())).await);
    h.wireless.set_advertised(None).await;

    let wireless = h.supervisor.wireless();
    spawn_attempt(wireless).expect("link is idle");

    // Scan window is 2s; the first failure sleeps 100ms before retrying
    settle_ms(2_050).await;
    assert_eq!(h.wireless.scan_count(), 1);
    assert_eq!(wireless.handle().state(), LinkState::Disconnected);
    assert!(wireless.handle().is_busy(), "backoff sleep still holds the link");
    assert!(!wireless.handle().needs_reconnect());

    settle_ms(100).await;
    assert_eq!(h.wireless.scan_count(), 2);
    assert_eq!(wireless.handle().cursor().attempt, 1);
    assert_eq!(wireless.handle().state(), LinkState::Connecting);

    // Second scan already started empty; the third finds the peer
    h.wireless.set_advertised(Some(SERIAL)).await;
    settle_ms(2_500).await;

    assert!(wireless.handle().is_connected());
    assert!(!wireless.handle().is_busy());
    assert_eq!(h.wireless.scan_count(), 3);
    assert_eq!(wireless.handle().cursor().attempt, 0);
    assert_eq!(wireless.handle().next_delay(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_busy_link_refuses_second_attempt() {
    let config = test_config_without_startup();
    let wireless = MockWireless::new(SERIAL, write_uuid(), notify_uuid())
        .with_scan_delay(Duration::from_millis(500));
    let h = harness_with(&config, wireless, MockBroker::new());
    let link = h.supervisor.wireless();

    let first = spawn_attempt(link).expect("link is idle");
    assert!(link.handle().is_busy());
    assert!(spawn_attempt(link).is_none());
    assert!(!attempt_connect(Arc::clone(link)).await);

    let report = h.supervisor.tick().await;
    assert!(!report.wireless_attempt);

    first.await.unwrap();
    assert!(link.handle().is_connected());
    assert!(!link.handle().is_busy());
    assert_eq!(h.wireless.scan_count(), 1);
    assert_eq!(h.wireless.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_releases_connection() {
    let h = harness(&test_config_without_startup());
    assert!(attempt_connect(Arc::clone(h.supervisor.broker())).await);

    // Peer only exposes the notify characteristic
    h.wireless
        .set_characteristics(vec![Characteristic {
            uuid: notify_uuid(),
            service: notify_uuid(),
            can_write: false,
            can_notify: true,
        }])
        .await;

    let link = h.supervisor.wireless();
    spawn_attempt(link).unwrap();
    settle_ms(50).await;

    assert_eq!(link.handle().state(), LinkState::Disconnected);
    assert_eq!(h.wireless.connect_count(), 1);
    assert_eq!(h.wireless.disconnect_count(), 1);

    let ble_state = h
        .broker
        .published_on(&format!("{BASE_TOPIC}/{SERIAL}/state/ble"))
        .await;
    assert_eq!(
        ble_state.last().unwrap().payload,
        LivenessRecord::offline(Component::Ble).to_payload()
    );

    // Characteristic that exists but cannot be written does not count either
    h.wireless
        .set_characteristics(vec![
            Characteristic {
                uuid: write_uuid(),
                service: write_uuid(),
                can_write: false,
                can_notify: false,
            },
            Characteristic {
                uuid: notify_uuid(),
                service: notify_uuid(),
                can_write: false,
                can_notify: true,
            },
        ])
        .await;
    settle_ms(100).await;
    assert!(!link.handle().is_connected());
    assert_eq!(h.wireless.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_broker_connect_failure_backs_off_then_recovers() {
    let config = test_config_without_startup();
    let wireless = MockWireless::new(SERIAL, write_uuid(), notify_uuid());
    let h = harness_with(&config, wireless, MockBroker::with_failure());
    let broker = h.supervisor.broker();

    spawn_attempt(broker).unwrap();
    settle_ms(50).await;
    assert_eq!(h.broker.connect_count().await, 1);
    assert_eq!(broker.handle().state(), LinkState::Disconnected);
    assert!(h.broker.get_published().await.is_empty());

    // 100ms then 200ms between attempts
    settle_ms(100).await;
    assert_eq!(h.broker.connect_count().await, 2);
    assert_eq!(broker.handle().cursor().attempt, 1);

    h.broker.set_fail_connect(false);
    settle_ms(300).await;
    assert!(broker.handle().is_connected());
    assert_eq!(h.broker.connect_count().await, 3);
    assert_eq!(broker.handle().cursor().attempt, 0);

    let mqtt_state = h
        .broker
        .published_on(&format!("{BASE_TOPIC}/{SERIAL}/state/mqtt"))
        .await;
    assert_eq!(mqtt_state.len(), 1);
    assert!(mqtt_state[0].retain);
    assert_eq!(
        mqtt_state[0].payload,
        LivenessRecord::online(Component::Mqtt).to_payload()
    );
}

#[tokio::test(start_paused = true)]
async fn test_broker_session_carries_last_will() {
    let h = harness(&test_config_without_startup());
    assert!(attempt_connect(Arc::clone(h.supervisor.broker())).await);

    let sessions = h.broker.sessions.lock().await.clone();
    assert_eq!(sessions.len(), 1);

    let session = &sessions[0];
    assert_eq!(session.client_id, format!("ble2mqtt-{SERIAL}"));
    assert_eq!(session.last_will.topic, format!("{BASE_TOPIC}/{SERIAL}/state/mqtt"));
    assert!(session.last_will.retain);
    assert_eq!(
        session.last_will.payload,
        LivenessRecord::offline(Component::Mqtt).to_payload()
    );
    assert_eq!(
        h.broker.get_subscriptions().await,
        vec![format!("{BASE_TOPIC}/control/{SERIAL}")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_link_reports_not_connected() {
    let h = harness(&test_config_without_startup());

    let result = h.supervisor.wireless().write(&[0x00, 0x02]).await;
    assert!(matches!(
        result,
        Err(ble2mqtt::LinkError::NotConnected {
            state: LinkState::Disconnected
        })
    ));
    assert!(!h.supervisor.broker().publish("any/topic", b"{}".to_vec(), false).await);
    assert!(h.broker.get_published().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_failure_does_not_drop_new_connection() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;

    let link = h.supervisor.wireless();
    let stale_epoch = link.handle().epoch();

    h.wireless.end_notifications().await;
    settle().await;
    assert_eq!(link.handle().state(), LinkState::Disconnected);

    assert!(h.supervisor.tick().await.wireless_attempt);
    settle().await;
    assert!(link.handle().is_connected());

    // A late failure report from the previous connection is ignored
    assert!(!link.handle().mark_lost(stale_epoch, "late failure"));
    assert!(link.handle().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_lost_wireless_releases_radio_before_offline_publish() {
    let h = harness(&test_config_without_startup());
    connect_both(&h).await;
    h.broker.clear_history().await;
    let ble_topic = format!("{BASE_TOPIC}/{SERIAL}/state/ble");

    h.broker.set_publish_latency(Duration::from_secs(1));
    h.wireless.end_notifications().await;
    settle().await;

    assert_eq!(h.wireless.disconnect_count(), 1);
    assert!(h.broker.published_on(&ble_topic).await.is_empty());

    settle_ms(2_000).await;
    let ble_state = h.broker.published_on(&ble_topic).await;
    assert_eq!(ble_state.len(), 1);
    assert_eq!(ble_state[0].json(), serde_json::json!({"state": "offline"}));
}
