//! MQTT v5 broker transport on rumqttc
//!
//! - [`connection`] - pure session configuration
//! - [`message_handler`] - pure event routing
//! - [`client`] - the poll-driven [`RumqttBroker`]

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttBroker;
pub use connection::{configure_mqtt_options, parse_broker_url, BrokerAddress};
pub use message_handler::{EventRoute, MessageHandler};
