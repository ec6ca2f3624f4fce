//! SSH transport for chaintun
//!
//! Implements the `chaintun-transport` traits on top of `russh`: the first hop
//! is dialed over TCP, every further hop is negotiated inside a `direct-tcpip`
//! channel of the previous session, and the egress session asks the server for
//! a `tcpip-forward` listener.

pub mod config;
mod handler;
pub mod keys;
pub mod session;

pub use config::{HostKeyPolicy, HostKeyVerifier};
pub use keys::decode_private_key;
pub use session::{SshConnector, SshListener, SshSession};
