//! Pure routing of rumqttc events

use crate::transport::InboundPublish;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, Event};

pub struct MessageHandler;

impl MessageHandler {
    /// Classify one event-loop event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundPublish {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Liveness records are retained and must survive a broker restart; relayed
    /// notifications are fire-and-forget.
    pub fn determine_qos_level(retain: bool) -> QoS {
        match retain {
            true => QoS::AtLeastOnce,
            false => QoS::AtMostOnce,
        }
    }
}

/// Routing decision for one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived(InboundPublish),
    /// Broker closed the session
    Disconnected,
    SubscriptionConfirmed {
        packet_id: u16,
    },
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}
