//! SSH sessions, nested dialing and remote forwards

use crate::config::{HostKeyPolicy, HostKeyVerifier};
use crate::handler::{ClientHandler, ForwardedChannel};
use crate::keys::decode_private_key;
use async_trait::async_trait;
use chaintun_proto::{split_host_port, HopSpec};
use chaintun_transport::{
    Accepted, RemoteListener, SecureSession, SessionConnector, TransportError, TransportResult,
};
use russh::client::{self, Handle, Msg};
use russh::{ChannelStream, Disconnect};
use russh_keys::key::KeyPair;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

type SharedHandle = Arc<Mutex<Handle<ClientHandler>>>;

fn map_ssh_error(hop: &HopSpec, err: russh::Error) -> TransportError {
    match err {
        russh::Error::UnknownKey => TransportError::HostKeyRejected(hop.host_port()),
        russh::Error::IO(e) => TransportError::IoError(e),
        other => TransportError::ConnectionFailed(format!("{}: {}", hop.host_port(), other)),
    }
}

/// Dials hops with one shared public-key credential and host-key policy
pub struct SshConnector {
    config: Arc<client::Config>,
    key: Arc<KeyPair>,
    verifier: Arc<HostKeyVerifier>,
}

impl SshConnector {
    /// Decode the private key once; every hop authenticates with it
    pub fn new(
        key_material: &str,
        passphrase: Option<&str>,
        policy: HostKeyPolicy,
    ) -> TransportResult<Self> {
        let key = decode_private_key(key_material, passphrase)?;
        Ok(Self::with_key(key, policy))
    }

    pub fn with_key(key: Arc<KeyPair>, policy: HostKeyPolicy) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            key,
            verifier: Arc::new(HostKeyVerifier::new(policy)),
        }
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        self.verifier.policy()
    }

    /// Run the SSH handshake and public-key auth for `hop` over `stream`
    async fn handshake<S>(&self, hop: &HopSpec, stream: S) -> TransportResult<SshSession>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler::new(
            hop.host().to_string(),
            hop.port(),
            self.verifier.clone(),
            forwarded_tx,
        );

        let mut handle = client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| map_ssh_error(hop, e))?;

        let authenticated = handle
            .authenticate_publickey(hop.username(), self.key.clone())
            .await
            .map_err(|e| map_ssh_error(hop, e))?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(TransportError::AuthenticationRejected(
                hop.username().to_string(),
            ));
        }

        debug!(hop = %hop, "SSH session authenticated");

        Ok(SshSession {
            hop: hop.clone(),
            handle: Arc::new(Mutex::new(handle)),
            forwarded: Mutex::new(Some(forwarded_rx)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, hop: &HopSpec) -> TransportResult<Self::Session> {
        let stream = TcpStream::connect(hop.host_port()).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", hop.host_port(), e))
        })?;
        let _ = stream.set_nodelay(true);

        self.handshake(hop, stream).await
    }

    async fn connect_via(
        &self,
        parent: &Self::Session,
        hop: &HopSpec,
    ) -> TransportResult<Self::Session> {
        let channel = parent
            .handle
            .lock()
            .await
            .channel_open_direct_tcpip(hop.host(), u32::from(hop.port()), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                TransportError::ChannelOpenFailed(format!(
                    "{} -> {}: {}",
                    parent.hop.host_port(),
                    hop.host_port(),
                    e
                ))
            })?;

        debug!(via = %parent.hop, hop = %hop, "Opened nested channel");

        self.handshake(hop, channel.into_stream()).await
    }
}

/// An authenticated SSH session to one hop
pub struct SshSession {
    hop: HopSpec,
    handle: SharedHandle,
    forwarded: Mutex<Option<mpsc::UnboundedReceiver<ForwardedChannel>>>,
    closed: AtomicBool,
}

impl SshSession {
    pub fn hop(&self) -> &HopSpec {
        &self.hop
    }
}

#[async_trait]
impl SecureSession for SshSession {
    type Listener = SshListener;

    async fn listen(&self, addr: &str) -> TransportResult<Self::Listener> {
        let (host, port) =
            split_host_port(addr).map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

        let mut forwarded = self.forwarded.lock().await;
        if forwarded.is_none() {
            return Err(TransportError::ListenerTaken);
        }

        let bound_port = self
            .handle
            .lock()
            .await
            .tcpip_forward(host.clone(), u32::from(port))
            .await
            .map_err(|e| match e {
                russh::Error::RequestDenied => TransportError::ForwardRejected(addr.to_string()),
                other => {
                    TransportError::ProtocolError(format!("tcpip-forward {}: {}", addr, other))
                }
            })?;

        // Port 0 asks the server to pick one; it reports the port it bound
        let port = match port {
            0 => u16::try_from(bound_port).unwrap_or(0),
            requested => requested,
        };
        let addr = match port {
            0 => addr.to_string(),
            _ if host.contains(':') => format!("[{}]:{}", host, port),
            _ => format!("{}:{}", host, port),
        };

        let incoming = forwarded.take().ok_or(TransportError::ListenerTaken)?;

        info!(listen = %addr, hop = %self.hop, "Remote forward established");

        Ok(SshListener {
            addr,
            host,
            port,
            handle: self.handle.clone(),
            incoming,
            closed: false,
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self
            .handle
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        debug!(hop = %self.hop, "SSH session closed");
    }
}

/// Remote `tcpip-forward` listener on the egress session
pub struct SshListener {
    addr: String,
    host: String,
    port: u16,
    handle: SharedHandle,
    incoming: mpsc::UnboundedReceiver<ForwardedChannel>,
    closed: bool,
}

#[async_trait]
impl RemoteListener for SshListener {
    type Stream = ChannelStream<Msg>;

    async fn accept(&mut self) -> TransportResult<Option<Accepted<Self::Stream>>> {
        match self.incoming.recv().await {
            Some(forwarded) => Ok(Some(Accepted {
                stream: forwarded.channel.into_stream(),
                peer: forwarded.originator,
            })),
            None if self.closed => Ok(None),
            // The handler went away with its session
            None => Err(TransportError::SessionClosed),
        }
    }

    fn listen_addr(&self) -> &str {
        &self.addr
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.incoming.close();
        let _ = self
            .handle
            .lock()
            .await
            .cancel_tcpip_forward(self.host.clone(), u32::from(self.port))
            .await;
        debug!(listen = %self.addr, "Remote forward cancelled");
    }
}
