//! Broker-facing message formats and topic layout

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
