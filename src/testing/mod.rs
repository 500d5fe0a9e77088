//! Mock transports so links, bridge and supervisor can be exercised without
//! a radio or a broker.

pub mod mocks;

pub use mocks::*;
