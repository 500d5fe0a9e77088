//! Structured logging setup
//!
//! The `link_span!` and `relay_span!` macros are exported at the crate root.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
