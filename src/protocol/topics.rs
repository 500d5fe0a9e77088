//! Topic namespace derived from configuration
//!
//! All topics hang off a configured base and the device id (the BLE serial
//! number). They are computed once at startup and never change.

use super::messages::Component;
use thiserror::Error;

/// Join topic levels with single slashes, dropping empty levels.
pub fn join_topic(levels: &[&str]) -> String {
    levels
        .iter()
        .flat_map(|level| level.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A device id becomes a single topic level, so it may not contain separators or wildcards.
pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

/// The base topic may span several levels but may not contain wildcards.
pub fn validate_base_topic(base: &str) -> Result<(), ValidationError> {
    if join_topic(&[base]).is_empty() {
        return Err(ValidationError::EmptyBaseTopic);
    }
    if let Some(ch) = base.chars().find(|c| matches!(c, '+' | '#')) {
        return Err(ValidationError::WildcardInBaseTopic(ch));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device id cannot be empty")]
    EmptyDeviceId,
    #[error("Device id contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
    #[error("Base topic cannot be empty")]
    EmptyBaseTopic,
    #[error("Base topic contains wildcard: '{0}'")]
    WildcardInBaseTopic(char),
}

/// Immutable set of topics for one bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    base: String,
    device_id: String,
    control: String,
}

impl TopicSet {
    pub fn new(base: &str, device_id: &str) -> Result<Self, ValidationError> {
        validate_base_topic(base)?;
        validate_device_id(device_id)?;

        let base = join_topic(&[base]);
        let control = join_topic(&[&base, "control", device_id]);
        Ok(Self {
            base,
            device_id: device_id.to_string(),
            control,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Inbound commands: `{base}/control/{device_id}`
    pub fn control_topic(&self) -> &str {
        &self.control
    }

    /// Outbound root: `{base}/{device_id}`
    pub fn device_topic(&self) -> String {
        join_topic(&[&self.base, &self.device_id])
    }

    /// Relayed notification: `{base}/{device_id}/{name}`
    pub fn notification_topic(&self, name: &str) -> String {
        join_topic(&[&self.base, &self.device_id, name])
    }

    /// Liveness: `{base}/{device_id}/state/{component}`
    pub fn state_topic(&self, component: Component) -> String {
        join_topic(&[&self.base, &self.device_id, "state", component.as_str()])
    }
}
