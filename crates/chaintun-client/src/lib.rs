//! Chained reverse tunnel client
//!
//! Dials a chain of SSH hops (each nested inside the previous one), asks the
//! last hop for a remote listener and forwards every connection accepted there
//! to a fixed target address. [`Supervisor`] re-runs the whole lifecycle after
//! any failure.
//!
//! # Example
//!
//! ```no_run
//! use chaintun_client::{Supervisor, Tunnel, TunnelConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TunnelConfig::builder()
//!     .private_key(std::fs::read_to_string("/home/me/.ssh/id_ed25519")?)
//!     .via("me@bastion.example.com:22")
//!     .via("me@10.0.0.5:22")
//!     .target("localhost:22")
//!     .remote_listen_addr("localhost:2222")
//!     .build()?;
//!
//! let tunnel = Tunnel::new(config)?;
//! Supervisor::new(tunnel).run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod proxy;
pub mod state;
pub mod supervisor;
pub mod tunnel;

pub use chain::{ActiveChain, EstablishedHop};
pub use config::{PrivateKey, TunnelConfig, TunnelConfigBuilder};
pub use error::{ProxyError, TunnelError};
pub use proxy::{ConnectionProxy, ConnectionTracker, RelayStats};
pub use state::TunnelState;
pub use supervisor::Supervisor;
pub use tunnel::Tunnel;

pub use chaintun_proto::HopSpec;
pub use chaintun_transport_ssh::{HostKeyPolicy, SshConnector};
