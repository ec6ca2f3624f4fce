//! Transport abstraction for chained tunnels
//!
//! The tunnel core only needs a handful of capabilities from its secure
//! transport: dial a hop over the network, dial a hop through an already
//! established session, ask the far end for a remote listener, and accept
//! connections on it. These traits describe that surface so the chain logic
//! can be driven by the SSH implementation or by in-memory mocks.

use async_trait::async_trait;
use chaintun_proto::HopSpec;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication rejected for user '{0}'")]
    AuthenticationRejected(String),

    #[error("Host key rejected for {0}")]
    HostKeyRejected(String),

    #[error("Failed to open channel: {0}")]
    ChannelOpenFailed(String),

    #[error("Remote forward refused for {0}")]
    ForwardRejected(String),

    #[error("Listener already taken for this session")]
    ListenerTaken,

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A connection accepted on a remote listener
#[derive(Debug)]
pub struct Accepted<S> {
    pub stream: S,
    /// Originator address as reported by the far end
    pub peer: String,
}

/// Establishes sessions to hops
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: SecureSession;

    /// Dial a hop directly over the network
    async fn connect(&self, hop: &HopSpec) -> TransportResult<Self::Session>;

    /// Dial a hop through a forwarding channel of an established session
    async fn connect_via(
        &self,
        parent: &Self::Session,
        hop: &HopSpec,
    ) -> TransportResult<Self::Session>;
}

/// An established secure session to one hop
#[async_trait]
pub trait SecureSession: Send + Sync + 'static {
    type Listener: RemoteListener;

    /// Request a listening socket on the far end of this session
    async fn listen(&self, addr: &str) -> TransportResult<Self::Listener>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&self);
}

/// Listener bound on the remote side of a session
#[async_trait]
pub trait RemoteListener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection.
    ///
    /// Returns `Ok(None)` once [`close`](Self::close) has been called. Losing
    /// the underlying session is an error.
    async fn accept(&mut self) -> TransportResult<Option<Accepted<Self::Stream>>>;

    /// Address the listener was requested on
    fn listen_addr(&self) -> &str;

    async fn close(&mut self);
}
