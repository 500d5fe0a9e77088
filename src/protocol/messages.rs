//! Wire messages exchanged over the broker
//!
//! Two shapes travel over MQTT:
//! - control commands `{"name": ..., "payload": ...}` arriving on the control topic
//! - liveness records `{"state": "online" | "offline"}` published (retained) per link

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A decoded command or notification: frame name plus structured payload.
///
/// Messages are transient. They are created when bytes arrive on one link and
/// consumed when they are encoded for the other link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Message {
    pub fn new<S: Into<String>>(name: S, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Parse a control-topic body into a message.
    pub fn from_control_payload(bytes: &[u8]) -> Result<Self, String> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| format!("Failed to parse control message: {e}"))?;
        // serde would also accept a `[name, payload]` array for the struct
        if !value.is_object() {
            return Err("Control message is not a JSON object".to_string());
        }
        let message: Message = serde_json::from_value(value)
            .map_err(|e| format!("Failed to parse control message: {e}"))?;
        if message.name.is_empty() {
            return Err("Control message has an empty name".to_string());
        }
        Ok(message)
    }

    /// JSON body published for a relayed notification: the payload alone.
    pub fn notification_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }
}

/// The two managed links, as named in liveness topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Mqtt,
    Ble,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Mqtt => "mqtt",
            Component::Ble => "ble",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Online,
    Offline,
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessState::Online => f.write_str("online"),
            LivenessState::Offline => f.write_str("offline"),
        }
    }
}

/// Liveness of one link. Published, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessRecord {
    pub component: Component,
    pub state: LivenessState,
}

#[derive(Serialize, Deserialize)]
struct StateBody {
    state: LivenessState,
}

impl LivenessRecord {
    pub fn new(component: Component, state: LivenessState) -> Self {
        Self { component, state }
    }

    pub fn online(component: Component) -> Self {
        Self::new(component, LivenessState::Online)
    }

    pub fn offline(component: Component) -> Self {
        Self::new(component, LivenessState::Offline)
    }

    /// Body published on the liveness topic: `{"state": "online"}`.
    pub fn to_payload(&self) -> Vec<u8> {
        // Serializing a single unit-variant field cannot fail
        serde_json::to_vec(&StateBody { state: self.state }).unwrap_or_default()
    }

    /// Parse a liveness body back into its state.
    pub fn parse_state(bytes: &[u8]) -> Result<LivenessState, serde_json::Error> {
        serde_json::from_slice::<StateBody>(bytes).map(|body| body.state)
    }
}
