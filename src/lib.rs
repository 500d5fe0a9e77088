//! ble2mqtt - BLE to MQTT bridge
//!
//! Keeps two self-healing links alive, one to a BLE peripheral and one to an
//! MQTT broker, and relays between them:
//!
//! - device notifications are decoded and published to `{base}/{device}/{name}`
//! - `{"name", "payload"}` commands on `{base}/control/{device}` are encoded and
//!   written to the device
//! - each link's liveness is published, retained, to `{base}/{device}/state/{mqtt|ble}`
//!
//! # Example
//!
//! ```rust
//! use ble2mqtt::link::{next_delay, BackoffCursor, BackoffPolicy};
//! use ble2mqtt::protocol::{Component, TopicSet};
//! use std::time::Duration;
//!
//! let topics = TopicSet::new("sterilor", "SN-0042").unwrap();
//! assert_eq!(topics.control_topic(), "sterilor/control/SN-0042");
//! assert_eq!(topics.state_topic(Component::Ble), "sterilor/SN-0042/state/ble");
//!
//! let mut cursor = BackoffCursor::new(BackoffPolicy::default());
//! cursor.attempt = 3;
//! assert_eq!(next_delay(&cursor), Duration::from_secs(8));
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod network;
pub mod observability;
pub mod protocol;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, BrokerLink, InboundOutcome, WirelessLink, WirelessSettings};
pub use codec::{CodecError, FrameCodec, HexFrameCodec};
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult};
pub use link::{LinkError, LinkHandle, LinkState};
pub use protocol::*;
pub use supervisor::{Supervisor, SupervisorSettings, TickReport};
pub use transport::mqtt::RumqttBroker;
