//! Bidirectional relay between the two links
//!
//! The bridge holds no connection state of its own. Each link pushes decoded
//! messages into a channel registered by [`Bridge::attach`], and the relay task
//! moves them across one at a time.

use super::broker::BrokerLink;
use super::wireless::WirelessLink;
use crate::codec::FrameCodec;
use crate::link::LinkError;
use crate::protocol::{Message, TopicSet};
use crate::transport::{BrokerTransport, WirelessTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

pub struct Bridge<W: WirelessTransport, B: BrokerTransport> {
    wireless: Arc<WirelessLink<W>>,
    broker: Arc<BrokerLink<B>>,
    codec: Arc<dyn FrameCodec>,
    topics: TopicSet,
}

impl<W: WirelessTransport, B: BrokerTransport> Bridge<W, B> {
    pub fn new(
        wireless: Arc<WirelessLink<W>>,
        broker: Arc<BrokerLink<B>>,
        codec: Arc<dyn FrameCodec>,
    ) -> Arc<Self> {
        let topics = broker.topics().clone();
        Arc::new(Self {
            wireless,
            broker,
            codec,
            topics,
        })
    }

    /// Register with both links and start relaying.
    ///
    /// Returns `None` if the links already feed another bridge.
    pub fn attach(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let (notification_tx, mut notifications) = mpsc::unbounded_channel();
        let (command_tx, mut commands) = mpsc::unbounded_channel();

        if !self.wireless.register_notifications(notification_tx)
            || !self.broker.register_commands(command_tx)
        {
            warn!("Links already attached to a bridge");
            return None;
        }

        let bridge = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(message) = notifications.recv() => {
                        bridge.relay_notification(message).await;
                    }
                    Some(message) = commands.recv() => {
                        bridge.relay_command(message);
                    }
                    else => break,
                }
            }
            debug!("Relay stopped");
        }))
    }

    /// Device → broker: publish the payload, non-retained, under the frame name
    pub async fn relay_notification(&self, message: Message) -> bool {
        let span = crate::relay_span!("notification", &message.name);
        async {
            let topic = self.topics.notification_topic(&message.name);
            let body = match message.notification_body() {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Notification payload not serializable");
                    return false;
                }
            };
            self.broker.publish(&topic, body, false).await
        }
        .instrument(span)
        .await
    }

    /// Broker → device: encode and write on a task of its own.
    ///
    /// Unknown frames are dropped and yield `None`. Otherwise the returned
    /// handle resolves once the write has been attempted; nobody has to await it.
    pub fn relay_command(&self, message: Message) -> Option<JoinHandle<Result<(), LinkError>>> {
        let span = crate::relay_span!("command", &message.name);
        let _entered = span.enter();

        if self.codec.lookup(&message.name).is_none() {
            warn!("Unknown frame, dropping command");
            return None;
        }

        let frame = match self.codec.encode(&message.name, &message.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Command could not be encoded");
                return None;
            }
        };

        let wireless = Arc::clone(&self.wireless);
        Some(tokio::spawn(
            async move {
                let result = wireless.write(&frame).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Command write failed");
                }
                result
            }
            .instrument(span.clone()),
        ))
    }
}
