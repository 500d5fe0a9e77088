//! Bridge configuration
//!
//! One TOML file describes the network interface, the broker session, the
//! wireless peer, the optional startup command and the retry cadence.
//! Credentials named by `*_env` fields are resolved when the broker session is
//! built, not at load time.

use crate::codec::{FrameCodec, HexFrameCodec};
use crate::link::BackoffPolicy;
use crate::protocol::{Component, LivenessRecord, Message, TopicSet};
use crate::transport::{Credentials, LastWill, SessionOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Paths tried, in order, when no config file is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["ble2mqtt.toml", "config/ble2mqtt.toml", "config.toml"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub network: NetworkSection,
    pub mqtt: MqttSection,
    pub ble: BleSection,
    /// Command written once, the first time the wireless link comes up
    pub startup: Option<StartupSection>,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub codec: CodecSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    pub hostname: String,
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Give up waiting for the interface after this long; unset waits forever
    pub wait_timeout_secs: Option<u64>,
}

fn default_interface() -> String {
    "eth0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Base topic
    pub topic: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the username; wins over `username`
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BleSection {
    /// Device identity: scan name filter and topic device id
    pub serial_number: String,
    pub write_uuid: Uuid,
    pub notify_uuid: Uuid,
    #[serde(default = "default_scan_window")]
    pub scan_window_secs: u64,
}

fn default_scan_window() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartupSection {
    pub name: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    120_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorSection {
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
}

fn default_tick() -> u64 {
    1000
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodecSection {
    /// Known frame names; empty accepts every four-hex-digit name
    #[serde(default)]
    pub frames: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No configuration file found (tried {0})")]
    NotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load the first of [`DEFAULT_CONFIG_PATHS`] that exists
    pub fn load_default() -> Result<(PathBuf, Self), ConfigError> {
        for candidate in DEFAULT_CONFIG_PATHS {
            let path = PathBuf::from(candidate);
            if path.exists() {
                let config = Self::load_from_file(&path)?;
                return Ok((path, config));
            }
        }
        Err(ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.hostname.trim().is_empty() {
            return Err(invalid("network.hostname cannot be empty"));
        }
        if self.network.interface.trim().is_empty() {
            return Err(invalid("network.interface cannot be empty"));
        }

        self.topics()?;

        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(invalid("reconnect.base_delay_ms must be greater than 0"));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(invalid(format!(
                "reconnect.max_delay_ms ({}) must be at least base_delay_ms ({})",
                reconnect.max_delay_ms, reconnect.base_delay_ms
            )));
        }
        if self.mqtt.heartbeat_interval_secs == 0 {
            return Err(invalid("mqtt.heartbeat_interval_secs must be greater than 0"));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(invalid("mqtt.keep_alive_secs must be greater than 0"));
        }
        if self.supervisor.tick_ms == 0 {
            return Err(invalid("supervisor.tick_ms must be greater than 0"));
        }
        if self.ble.scan_window_secs == 0 {
            return Err(invalid("ble.scan_window_secs must be greater than 0"));
        }

        let codec = self.frame_codec()?;
        if let Some(startup) = &self.startup {
            if codec.lookup(&startup.name).is_none() {
                return Err(invalid(format!(
                    "startup command '{}' is not a known frame",
                    startup.name
                )));
            }
        }

        Ok(())
    }

    pub fn topics(&self) -> Result<TopicSet, ConfigError> {
        TopicSet::new(&self.mqtt.topic, &self.ble.serial_number)
            .map_err(|e| invalid(format!("topic namespace: {e}")))
    }

    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("ble2mqtt-{}", self.ble.serial_number))
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
            .or_else(|| self.mqtt.username.clone())
    }

    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
            .or_else(|| self.mqtt.password.clone())
    }

    /// Broker session parameters, with the retained offline last will
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let topics = self.topics()?;
        let credentials = self.get_mqtt_username().map(|username| Credentials {
            username,
            password: self.get_mqtt_password().unwrap_or_default(),
        });

        Ok(SessionOptions {
            client_id: self.client_id(),
            broker_url: self.mqtt.broker_url.clone(),
            credentials,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            last_will: LastWill {
                topic: topics.state_topic(Component::Mqtt),
                payload: LivenessRecord::offline(Component::Mqtt).to_payload(),
                retain: true,
            },
        })
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.reconnect.base_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    pub fn frame_codec(&self) -> Result<HexFrameCodec, ConfigError> {
        HexFrameCodec::with_frames(&self.codec.frames).map_err(|e| invalid(e.to_string()))
    }

    pub fn startup_message(&self) -> Option<Message> {
        self.startup
            .as_ref()
            .map(|startup| Message::new(startup.name.clone(), startup.payload.clone()))
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.ble.scan_window_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.mqtt.heartbeat_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor.tick_ms)
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network.wait_timeout_secs.map(Duration::from_secs)
    }

    /// Copy safe to print: inline password masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.mqtt.password.is_some() {
            config.mqtt.password = Some("***".to_string());
        }
        config
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[network]
hostname = "sterilizer-01"

[mqtt]
broker_url = "mqtt://localhost:1883"
topic = "ble2mqtt"

[ble]
serial_number = "ABC123"
write_uuid = "0000fff2-0000-1000-8000-00805f9b34fb"
notify_uuid = "0000fff1-0000-1000-8000-00805f9b34fb"

[startup]
name = "000a"
payload = { pincode = 1234 }
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn invalid<S: Into<String>>(message: S) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}
