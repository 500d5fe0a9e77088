//! The two concrete links and the relay between them
//!
//! # Example
//!
//! ```rust
//! use ble2mqtt::bridge::InboundOutcome;
//! use ble2mqtt::link::{attempt_connect, LinkDriver};
//! use ble2mqtt::testing::{MockBroker, MockWireless};
//! use ble2mqtt::{BridgeConfig, Supervisor};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = BridgeConfig::from_toml_str(r#"
//!     [network]
//!     hostname = "sterilizer-01"
//!     [mqtt]
//!     broker_url = "mqtt://localhost:1883"
//!     topic = "sterilor"
//!     [ble]
//!     serial_number = "SN-0042"
//!     write_uuid = "0000fff2-0000-1000-8000-00805f9b34fb"
//!     notify_uuid = "0000fff1-0000-1000-8000-00805f9b34fb"
//! "#).unwrap();
//!
//! let broker = MockBroker::new();
//! let wireless = MockWireless::new("SN-0042", config.ble.write_uuid, config.ble.notify_uuid);
//! let supervisor = Supervisor::from_config(&config, wireless, broker.clone()).unwrap();
//!
//! assert!(attempt_connect(Arc::clone(supervisor.broker())).await);
//! assert!(supervisor.broker().handle().is_connected());
//!
//! // Commands for other devices are not ours
//! let outcome = supervisor.broker().handle_inbound("sterilor/control/SN-0001", b"{}");
//! assert_eq!(outcome, InboundOutcome::Ignored);
//! # });
//! ```

pub mod broker;
pub mod router;
pub mod wireless;

pub use broker::{BrokerLink, InboundOutcome};
pub use router::Bridge;
pub use wireless::{WirelessLink, WirelessSettings};
