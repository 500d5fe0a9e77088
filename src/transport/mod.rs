//! Transport capabilities consumed by the links
//!
//! The bridge does not speak BLE or MQTT itself. It drives these traits, which
//! are implemented by [`mqtt::RumqttBroker`], by the btleplug-backed central
//! in [`ble`] (behind the `ble` feature), and by the mocks in
//! [`crate::testing`].

#[cfg(feature = "ble")]
pub mod ble;
pub mod mqtt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Transport-level failures, on either link
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Write failed")]
    WriteFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// A peer seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Platform address (MAC on Linux, CoreBluetooth UUID on macOS)
    pub address: String,
    pub name: Option<String>,
}

/// A discovered GATT characteristic and what it supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service: Uuid,
    pub can_write: bool,
    pub can_notify: bool,
}

/// Inbound notification values, in arrival order
pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// End `values` with [`TransportError::Closed`] as soon as `disconnected` yields.
///
/// Some platform notification streams stay pending forever after the peer
/// drops; pairing them with the platform's disconnect events makes the drop
/// visible to the consumer.
pub fn close_on_disconnect<S>(values: NotificationStream, disconnected: S) -> NotificationStream
where
    S: Stream<Item = ()> + Send + 'static,
{
    let closed = disconnected.take(1).map(|()| Err(TransportError::Closed));
    futures::stream::select(values, closed).boxed()
}

/// BLE central role: find and connect to the peer
#[async_trait]
pub trait WirelessTransport: Send + Sync + 'static {
    type Connection: WirelessConnection;

    /// Scan for up to `window` and return the first peer whose advertised name
    /// contains `name_filter`.
    async fn scan(&self, name_filter: &str, window: Duration)
        -> Result<Option<Peer>, TransportError>;

    async fn connect(&self, peer: &Peer) -> Result<Self::Connection, TransportError>;
}

/// An open GATT connection
#[async_trait]
pub trait WirelessConnection: Send + Sync + 'static {
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>, TransportError>;

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream, TransportError>;

    async fn write(&self, characteristic: &Characteristic, data: &[u8])
        -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Message the broker will publish if the session drops without a clean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to open one broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    /// `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub last_will: LastWill,
}

/// A publish received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// MQTT client role
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Open a fresh session, replacing any previous one. Resolves once the
    /// broker has accepted it.
    async fn connect(&self, options: &SessionOptions) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;

    /// Drive the session one step, returning at most one inbound message.
    /// `Ok(None)` means nothing arrived.
    async fn pump_once(&self) -> Result<Option<InboundPublish>, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
