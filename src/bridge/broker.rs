//! Broker (MQTT) link
//!
//! Owns the broker session, the control-topic subscription and every publish
//! the bridge makes, including liveness records for both links.

use crate::link::{LinkDriver, LinkError, LinkHandle, LinkState, LivenessSink};
use crate::protocol::{Component, LivenessRecord, LivenessState, Message, TopicSet};
use crate::transport::{BrokerTransport, SessionOptions};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What became of one inbound publish
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Not the control topic
    Ignored,
    /// Control topic, but the body was unusable or nobody was listening
    Dropped,
    Forwarded(Message),
}

pub struct BrokerLink<B: BrokerTransport> {
    handle: Arc<LinkHandle>,
    transport: B,
    options: SessionOptions,
    topics: TopicSet,
    commands: OnceLock<mpsc::UnboundedSender<Message>>,
}

impl<B: BrokerTransport> BrokerLink<B> {
    pub fn new(
        handle: Arc<LinkHandle>,
        transport: B,
        options: SessionOptions,
        topics: TopicSet,
    ) -> Self {
        Self {
            handle,
            transport,
            options,
            topics,
            commands: OnceLock::new(),
        }
    }

    pub fn transport(&self) -> &B {
        &self.transport
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Route control commands to `sender`. Only the first registration wins.
    pub fn register_commands(&self, sender: mpsc::UnboundedSender<Message>) -> bool {
        self.commands.set(sender).is_ok()
    }

    /// Publish if connected. Failures drop the link and are otherwise swallowed.
    ///
    /// Returns whether the broker accepted the publish.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        let epoch = self.handle.epoch();
        if !self.handle.is_connected() {
            debug!(link = %Component::Mqtt, topic, "Broker down, publish skipped");
            return false;
        }

        match self.transport.publish(topic, payload, retain).await {
            Ok(()) => {
                debug!(link = %Component::Mqtt, topic, retain, "Published");
                true
            }
            Err(e) => {
                warn!(link = %Component::Mqtt, topic, error = %e, "Publish failed");
                if self.handle.mark_lost(epoch, "publish failed") {
                    self.release().await;
                }
                false
            }
        }
    }

    pub async fn publish_liveness(&self, record: LivenessRecord) -> bool {
        let topic = self.topics.state_topic(record.component);
        self.publish(&topic, record.to_payload(), true).await
    }

    /// Drive the session one step; `None` when idle or not connected.
    pub async fn pump_once(&self) -> Option<InboundOutcome> {
        if !self.handle.is_connected() {
            return None;
        }
        let epoch = self.handle.epoch();

        match self.transport.pump_once().await {
            Ok(Some(inbound)) => Some(self.handle_inbound(&inbound.topic, &inbound.payload)),
            Ok(None) => None,
            Err(e) => {
                warn!(link = %Component::Mqtt, error = %e, "Broker session failed");
                if self.handle.mark_lost(epoch, "pump failed") {
                    self.release().await;
                }
                None
            }
        }
    }

    /// Classify one inbound publish and hand commands off without waiting on them
    pub fn handle_inbound(&self, topic: &str, payload: &[u8]) -> InboundOutcome {
        if topic != self.topics.control_topic() {
            debug!(link = %Component::Mqtt, topic, "Ignoring message on unexpected topic");
            return InboundOutcome::Ignored;
        }

        let message = match Message::from_control_payload(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(link = %Component::Mqtt, topic, error = %e, "Dropping control message");
                return InboundOutcome::Dropped;
            }
        };

        match self.commands.get() {
            Some(sender) if sender.send(message.clone()).is_ok() => {
                debug!(link = %Component::Mqtt, frame = %message.name, "Command received");
                InboundOutcome::Forwarded(message)
            }
            _ => {
                warn!(link = %Component::Mqtt, frame = %message.name, "No command consumer, dropping");
                InboundOutcome::Dropped
            }
        }
    }

    /// Clean disconnect for shutdown. The last will is not fired.
    pub async fn disconnect(&self) {
        self.handle.transition(LinkState::Disconnected);
        if let Err(e) = self.transport.disconnect().await {
            warn!(link = %Component::Mqtt, error = %e, "Broker disconnect failed");
        }
    }
}

#[async_trait]
impl<B: BrokerTransport> LinkDriver for BrokerLink<B> {
    fn handle(&self) -> &Arc<LinkHandle> {
        &self.handle
    }

    async fn establish(&self) -> Result<(), LinkError> {
        self.transport.connect(&self.options).await?;
        self.transport
            .subscribe(self.topics.control_topic())
            .await?;
        info!(
            link = %Component::Mqtt,
            client_id = %self.options.client_id,
            topic = %self.topics.control_topic(),
            "Subscribed to control topic"
        );
        Ok(())
    }

    async fn release(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!(link = %Component::Mqtt, error = %e, "Release disconnect failed");
        }
    }

    async fn announce(&self, state: LivenessState) {
        self.publish_liveness(LivenessRecord::new(Component::Mqtt, state))
            .await;
    }
}

#[async_trait]
impl<B: BrokerTransport> LivenessSink for BrokerLink<B> {
    async fn announce(&self, component: Component, state: LivenessState) {
        self.publish_liveness(LivenessRecord::new(component, state))
            .await;
    }
}
