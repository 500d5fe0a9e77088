//! rumqttc-backed [`BrokerTransport`]
//!
//! `connect` polls the event loop inline until the ConnAck, then moves it onto
//! its own task. That task forwards inbound publishes over a channel, and
//! [`BrokerTransport::pump_once`] takes at most one of them per supervisor
//! tick. `EventLoop::poll` is never cancelled mid-step; only the channel
//! receive is bounded by the poll timeout.

use super::connection::configure_mqtt_options;
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{BrokerTransport, InboundPublish, SessionOptions, TransportError};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request channel depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

type InboundItem = Result<InboundPublish, TransportError>;

/// Event loop task of the current session and the receiving end of its output
struct EventPump {
    inbound: mpsc::Receiver<InboundItem>,
    task: JoinHandle<()>,
}

impl EventPump {
    fn spawn(event_loop: EventLoop) -> Self {
        let (tx, inbound) = mpsc::channel(REQUEST_CAPACITY);
        let task = tokio::spawn(drive_event_loop(event_loop, tx));
        Self { inbound, task }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll until the session ends. The first error is forwarded and ends the task.
async fn drive_event_loop(mut event_loop: EventLoop, inbound: mpsc::Sender<InboundItem>) {
    loop {
        let item = match event_loop.poll().await {
            Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived(publish) => Ok(publish),
                EventRoute::Disconnected => Err(TransportError::Closed),
                EventRoute::SubscriptionConfirmed { packet_id } => {
                    debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                    continue;
                }
                EventRoute::InfrastructureEvent(event) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", event);
                    continue;
                }
                EventRoute::ConnectionAcknowledged | EventRoute::OutgoingEvent => continue,
            },
            Err(e) => Err(TransportError::ConnectionFailed(Box::new(e))),
        };
        let ended = item.is_err();
        if inbound.send(item).await.is_err() || ended {
            break;
        }
    }
    debug!(target: "mqtt_transport", "MQTT event loop task finished");
}

pub struct RumqttBroker {
    client: Mutex<Option<AsyncClient>>,
    events: Mutex<Option<EventPump>>,
    connect_timeout: Duration,
    poll_timeout: Duration,
}

impl RumqttBroker {
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(10), Duration::from_millis(250))
    }

    /// `connect_timeout` bounds the wait for ConnAck; `poll_timeout` bounds one pump step.
    pub fn with_timeouts(connect_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            events: Mutex::new(None),
            connect_timeout,
            poll_timeout,
        }
    }

    fn create_connection(
        options: &SessionOptions,
    ) -> Result<(AsyncClient, EventLoop), TransportError> {
        let mqtt_options = configure_mqtt_options(options)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CAPACITY))
    }

    /// Poll until the broker acknowledges the session
    async fn wait_for_connection_confirmation(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                let event = event_loop
                    .poll()
                    .await
                    .map_err(|e| TransportError::ConnectionFailed(Box::new(e)))?;
                match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => return Ok(()),
                    EventRoute::Disconnected => {
                        return Err(TransportError::ConnectionFailedStr(
                            "Broker closed the session before ConnAck".to_string(),
                        ))
                    }
                    _ => continue,
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    async fn current_client(&self) -> Result<AsyncClient, TransportError> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::ConnectionFailedStr("No broker session".to_string()))
    }
}

impl Default for RumqttBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for RumqttBroker {
    async fn connect(&self, options: &SessionOptions) -> Result<(), TransportError> {
        let (client, mut event_loop) = Self::create_connection(options)?;

        // Drop any previous session first so its socket is not polled again
        self.client.lock().await.take();
        self.events.lock().await.take();

        Self::wait_for_connection_confirmation(&mut event_loop, self.connect_timeout).await?;
        info!(client_id = %options.client_id, broker = %options.broker_url, "MQTT session established");

        *self.client.lock().await = Some(client);
        *self.events.lock().await = Some(EventPump::spawn(event_loop));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.current_client()
            .await?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;
        debug!(target: "mqtt_transport", "Subscribe queued for {}", topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let qos = MessageHandler::determine_qos_level(retain);
        self.current_client()
            .await?
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    async fn pump_once(&self) -> Result<Option<InboundPublish>, TransportError> {
        let mut guard = self.events.lock().await;
        let events = guard
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionFailedStr("No broker session".to_string()))?;

        match tokio::time::timeout(self.poll_timeout, events.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(inbound))) => Ok(Some(inbound)),
            Ok(Some(Err(e))) => {
                // A failed session is not reused; the next connect builds a new one
                guard.take();
                Err(e)
            }
            Ok(None) => {
                guard.take();
                Err(TransportError::Closed)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };
        client
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(Box::new(e)))?;

        // Give the event loop task time to flush the Disconnect packet
        if let Some(mut events) = self.events.lock().await.take() {
            let flush = tokio::time::timeout(self.poll_timeout, &mut events.task).await;
            if flush.is_err() {
                warn!("MQTT disconnect not confirmed before timeout");
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LastWill;

    fn session(broker_url: &str) -> SessionOptions {
        SessionOptions {
            client_id: "ble2mqtt-test".to_string(),
            broker_url: broker_url.to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(5),
            last_will: LastWill {
                topic: "ble2mqtt/state/mqtt".to_string(),
                payload: br#"{"state":"offline"}"#.to_vec(),
                retain: true,
            },
        }
    }

    #[tokio::test]
    async fn test_operations_fail_without_session() {
        let broker = RumqttBroker::new();

        assert!(broker.subscribe("ble2mqtt/control/x").await.is_err());
        assert!(broker
            .publish("ble2mqtt/state/mqtt", b"{}".to_vec(), true)
            .await
            .is_err());
        assert!(broker.pump_once().await.is_err());
    }

    /// Install a session fed from a test channel instead of a live event loop
    async fn with_fed_session(broker: &RumqttBroker) -> mpsc::Sender<InboundItem> {
        let (tx, inbound) = mpsc::channel(REQUEST_CAPACITY);
        let task = tokio::spawn(std::future::pending::<()>());
        *broker.events.lock().await = Some(EventPump { inbound, task });
        tx
    }

    fn inbound(topic: &str) -> InboundPublish {
        InboundPublish {
            topic: topic.to_string(),
            payload: b"{}".to_vec(),
            retain: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_timeout_keeps_later_publishes() {
        let broker =
            RumqttBroker::with_timeouts(Duration::from_secs(1), Duration::from_millis(50));
        let tx = with_fed_session(&broker).await;

        assert!(broker.pump_once().await.unwrap().is_none());

        tx.send(Ok(inbound("ble2mqtt/control/a"))).await.unwrap();
        tx.send(Ok(inbound("ble2mqtt/control/b"))).await.unwrap();
        let first = broker.pump_once().await.unwrap().unwrap();
        assert_eq!(first.topic, "ble2mqtt/control/a");
        let second = broker.pump_once().await.unwrap().unwrap();
        assert_eq!(second.topic, "ble2mqtt/control/b");
        assert!(broker.pump_once().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_error_drops_session() {
        let broker =
            RumqttBroker::with_timeouts(Duration::from_secs(1), Duration::from_millis(50));
        let tx = with_fed_session(&broker).await;

        tx.send(Err(TransportError::Closed)).await.unwrap();
        assert!(matches!(broker.pump_once().await, Err(TransportError::Closed)));
        assert!(matches!(
            broker.pump_once().await,
            Err(TransportError::ConnectionFailedStr(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_event_loop_reads_as_closed() {
        let broker =
            RumqttBroker::with_timeouts(Duration::from_secs(1), Duration::from_millis(50));
        drop(with_fed_session(&broker).await);

        assert!(matches!(broker.pump_once().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let broker = RumqttBroker::new();
        assert!(broker.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let broker = RumqttBroker::new();
        let result = broker.connect(&session("invalid-url")).await;
        assert!(matches!(result, Err(TransportError::InvalidBrokerUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_when_broker_unreachable() {
        let broker =
            RumqttBroker::with_timeouts(Duration::from_millis(500), Duration::from_millis(50));
        // Port 1 on loopback refuses connections
        let result = broker.connect(&session("mqtt://127.0.0.1:1")).await;
        assert!(result.is_err());
        assert!(broker.pump_once().await.is_err());
    }
}
