//! Frame codec capability
//!
//! The bridge never interprets device frames itself. It only needs to turn a
//! named command plus structured payload into wire bytes and back, and to ask
//! whether a name is known at all.

pub mod hex_frame;

pub use hex_frame::HexFrameCodec;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// Well-formed frame whose name has no codec. Dropped, never fatal.
    #[error("Frame not implemented: {0}")]
    UnknownFrame(String),
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl CodecError {
    pub fn is_unknown_frame(&self) -> bool {
        matches!(self, CodecError::UnknownFrame(_))
    }
}

/// What the codec knows about one frame name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub name: String,
    pub code: u16,
}

pub trait FrameCodec: Send + Sync {
    fn lookup(&self, name: &str) -> Option<FrameDescriptor>;

    fn encode(&self, name: &str, payload: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decode one notification into `(name, payload)`.
    fn decode(&self, bytes: &[u8]) -> Result<(String, Value), CodecError>;
}
