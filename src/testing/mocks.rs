//! Mock transports for testing
//!
//! Both mocks are cheap to clone and every clone shares the same recorders,
//! so a test keeps one clone and hands the other to the link under test.

use crate::transport::{
    BrokerTransport, Characteristic, InboundPublish, NotificationStream, Peer, SessionOptions,
    TransportError, WirelessConnection, WirelessTransport,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// One publish seen by [`MockBroker`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

fn mock_failure(what: &str) -> Box<dyn std::error::Error + Send + Sync> {
    format!("Mock {what} failure").into()
}

/// Mock broker session
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub sessions: Arc<Mutex<Vec<SessionOptions>>>,
    inbound: Arc<Mutex<VecDeque<InboundPublish>>>,
    fail_connect: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    fail_pump: Arc<AtomicBool>,
    /// Milliseconds each publish takes before it is recorded
    publish_latency_ms: Arc<AtomicU64>,
    disconnects: Arc<AtomicUsize>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        let broker = Self::default();
        broker.set_fail_connect(true);
        broker
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pump(&self, fail: bool) {
        self.fail_pump.store(fail, Ordering::SeqCst);
    }

    pub fn set_publish_latency(&self, latency: Duration) {
        self.publish_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Queue a message for the next `pump_once`
    pub async fn push_inbound(&self, topic: &str, payload: &[u8], retain: bool) {
        self.inbound.lock().await.push_back(InboundPublish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }
}

#[async_trait]
impl BrokerTransport for MockBroker {
    async fn connect(&self, options: &SessionOptions) -> Result<(), TransportError> {
        self.sessions.lock().await.push(options.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(mock_failure("connection")));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let latency = self.publish_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(mock_failure("publish")));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    async fn pump_once(&self) -> Result<Option<InboundPublish>, TransportError> {
        if self.fail_pump.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(self.inbound.lock().await.pop_front())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type NotificationSender = mpsc::UnboundedSender<Result<Bytes, TransportError>>;

/// Mock BLE central with a single scriptable peer
#[derive(Debug, Clone)]
pub struct MockWireless {
    /// Advertised name of the peer in range; `None` means nothing is in range
    advertised: Arc<Mutex<Option<String>>>,
    characteristics: Arc<Mutex<Vec<Characteristic>>>,
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    notifier: Arc<Mutex<Option<NotificationSender>>>,
    scans: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
    fail_write: Arc<AtomicBool>,
    /// Simulated scan duration
    scan_delay: Duration,
}

impl MockWireless {
    /// A peer advertising `name` with a writable and a notifying characteristic
    pub fn new(name: &str, write_uuid: Uuid, notify_uuid: Uuid) -> Self {
        let service = Uuid::from_u128(0x0000_fff0_0000_1000_8000_0080_5f9b_34fb);
        Self {
            advertised: Arc::new(Mutex::new(Some(name.to_string()))),
            characteristics: Arc::new(Mutex::new(vec![
                Characteristic {
                    uuid: write_uuid,
                    service,
                    can_write: true,
                    can_notify: false,
                },
                Characteristic {
                    uuid: notify_uuid,
                    service,
                    can_write: false,
                    can_notify: true,
                },
            ])),
            writes: Arc::default(),
            notifier: Arc::default(),
            scans: Arc::default(),
            connects: Arc::default(),
            disconnects: Arc::default(),
            fail_connect: Arc::default(),
            fail_write: Arc::default(),
            scan_delay: Duration::ZERO,
        }
    }

    pub fn with_scan_delay(mut self, scan_delay: Duration) -> Self {
        self.scan_delay = scan_delay;
        self
    }

    pub async fn set_advertised(&self, name: Option<&str>) {
        *self.advertised.lock().await = name.map(str::to_string);
    }

    pub async fn set_characteristics(&self, characteristics: Vec<Characteristic>) {
        *self.characteristics.lock().await = characteristics;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    /// Deliver one notification on the active subscription
    pub async fn notify(&self, value: &[u8]) -> bool {
        match self.notifier.lock().await.as_ref() {
            Some(sender) => sender.send(Ok(Bytes::copy_from_slice(value))).is_ok(),
            None => false,
        }
    }

    /// Fail the active subscription with a transport error
    pub async fn break_notifications(&self) -> bool {
        match self.notifier.lock().await.as_ref() {
            Some(sender) => sender.send(Err(TransportError::Closed)).is_ok(),
            None => false,
        }
    }

    /// End the active subscription as if the peer went away
    pub async fn end_notifications(&self) {
        self.notifier.lock().await.take();
    }

    pub async fn get_writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().await.clone()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WirelessTransport for MockWireless {
    type Connection = MockConnection;

    async fn scan(
        &self,
        name_filter: &str,
        window: Duration,
    ) -> Result<Option<Peer>, TransportError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let advertised = self.advertised.lock().await.clone();
        match advertised {
            Some(name) if name.contains(name_filter) => {
                tokio::time::sleep(self.scan_delay.min(window)).await;
                Ok(Some(Peer {
                    address: "AA:BB:CC:DD:EE:FF".to_string(),
                    name: Some(name),
                }))
            }
            _ => {
                tokio::time::sleep(window).await;
                Ok(None)
            }
        }
    }

    async fn connect(&self, _peer: &Peer) -> Result<Self::Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(mock_failure("connection")));
        }
        Ok(MockConnection {
            central: self.clone(),
        })
    }
}

/// Connection handed out by [`MockWireless`]
#[derive(Debug)]
pub struct MockConnection {
    central: MockWireless,
}

#[async_trait]
impl WirelessConnection for MockConnection {
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>, TransportError> {
        Ok(self.central.characteristics.lock().await.clone())
    }

    async fn subscribe(
        &self,
        _characteristic: &Characteristic,
    ) -> Result<NotificationStream, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.central.notifier.lock().await = Some(sender);

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }

    async fn write(
        &self,
        _characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if self.central.fail_write.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed(mock_failure("write")));
        }
        self.central.writes.lock().await.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.central.disconnects.fetch_add(1, Ordering::SeqCst);
        self.central.notifier.lock().await.take();
        Ok(())
    }
}
