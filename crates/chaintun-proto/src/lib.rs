//! Shared types for chaintun
//!
//! Hop descriptors (`user@host:port`) and `host:port` endpoint helpers used by
//! the transport and client crates.

pub mod endpoint;
pub mod hop;

pub use endpoint::{split_host_port, EndpointError};
pub use hop::{HopParseError, HopSpec};
