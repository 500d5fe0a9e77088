//! Top-level error type
//!
//! Only boot-time failures surface here. Once the supervisor is running, link
//! failures are absorbed by the reconnect loop and never reach the caller.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::link::LinkError;
use crate::network::NetworkError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network bring-up failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("{0}")]
    Unsupported(String),
}

impl BridgeError {
    /// Boot errors end the process; everything else is retried by the links.
    pub fn is_boot_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Config(_)
                | BridgeError::Network(_)
                | BridgeError::Io(_)
                | BridgeError::Unsupported(_)
        )
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported(message.into())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_boot_fatal_classification() {
        let config: BridgeError = ConfigError::InvalidConfig("bad".to_string()).into();
        assert!(config.is_boot_fatal());

        let network: BridgeError = NetworkError::Timeout {
            interface: "eth0".to_string(),
            waited: Duration::from_secs(5),
        }
        .into();
        assert!(network.is_boot_fatal());

        let codec: BridgeError = CodecError::UnknownFrame("ffff".to_string()).into();
        assert!(!codec.is_boot_fatal());

        let transport: BridgeError = TransportError::Closed.into();
        assert!(!transport.is_boot_fatal());
    }

    #[test]
    fn test_error_display() {
        let errors: Vec<BridgeError> = vec![
            ConfigError::InvalidConfig("tick_ms".to_string()).into(),
            TransportError::InvalidBrokerUrl("nope".to_string()).into(),
            CodecError::Malformed("short".to_string()).into(),
            LinkError::PeerNotFound("ABC123".to_string()).into(),
            BridgeError::unsupported("rebuild with --features ble"),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
