//! Test helpers and utilities for integration tests

use ble2mqtt::config::BridgeConfig;
use ble2mqtt::link::{attempt_connect, LinkDriver};
use ble2mqtt::supervisor::Supervisor;
use ble2mqtt::testing::{MockBroker, MockWireless};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[allow(dead_code)]
pub const SERIAL: &str = "SN-0042";
#[allow(dead_code)]
pub const BASE_TOPIC: &str = "sterilor";

#[allow(dead_code)]
pub fn write_uuid() -> Uuid {
    Uuid::from_u128(0x0000_fff2_0000_1000_8000_0080_5f9b_34fb)
}

#[allow(dead_code)]
pub fn notify_uuid() -> Uuid {
    Uuid::from_u128(0x0000_fff1_0000_1000_8000_0080_5f9b_34fb)
}

/// Minimal valid configuration followed by `extra` sections
#[allow(dead_code)]
pub fn config_toml(extra: &str) -> String {
    format!(
        r#"
[network]
hostname = "sterilizer-01"

[mqtt]
broker_url = "mqtt://localhost:1883"
topic = "{BASE_TOPIC}"

[ble]
serial_number = "{SERIAL}"
write_uuid = "{}"
notify_uuid = "{}"
scan_window_secs = 2

[reconnect]
base_delay_ms = 100
max_delay_ms = 1000
{extra}
"#,
        write_uuid(),
        notify_uuid(),
    )
}

/// Configuration with an access-code startup command
#[allow(dead_code)]
pub fn test_config() -> BridgeConfig {
    BridgeConfig::from_toml_str(&config_toml(
        r#"
[startup]
name = "000a"
payload = { pincode = 1234 }
"#,
    ))
    .expect("test config should be valid")
}

#[allow(dead_code)]
pub fn test_config_without_startup() -> BridgeConfig {
    BridgeConfig::from_toml_str(&config_toml("")).expect("test config should be valid")
}

/// Supervisor wired to mocks, plus clones of the mocks for inspection
#[allow(dead_code)]
pub struct Harness {
    pub supervisor: Supervisor<MockWireless, MockBroker>,
    pub wireless: MockWireless,
    pub broker: MockBroker,
}

#[allow(dead_code)]
pub fn harness(config: &BridgeConfig) -> Harness {
    let wireless = MockWireless::new(SERIAL, write_uuid(), notify_uuid());
    harness_with(config, wireless, MockBroker::new())
}

#[allow(dead_code)]
pub fn harness_with(config: &BridgeConfig, wireless: MockWireless, broker: MockBroker) -> Harness {
    let supervisor = Supervisor::from_config(config, wireless.clone(), broker.clone())
        .expect("supervisor should build from test config");
    Harness {
        supervisor,
        wireless,
        broker,
    }
}

/// Let spawned tasks run. Under a paused clock this also advances time by `ms`.
#[allow(dead_code)]
pub async fn settle_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[allow(dead_code)]
pub async fn settle() {
    settle_ms(10).await;
}

/// Bring the broker up inline, then tick until the wireless link connects too
#[allow(dead_code)]
pub async fn connect_both(harness: &Harness) {
    assert!(attempt_connect(Arc::clone(harness.supervisor.broker())).await);
    harness.supervisor.tick().await;
    for _ in 0..100 {
        if harness.supervisor.broker().handle().is_connected()
            && harness.supervisor.wireless().handle().is_connected()
        {
            return;
        }
        settle().await;
    }
    panic!("links did not connect");
}
