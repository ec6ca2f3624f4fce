use crate::config::HostKeyVerifier;
use async_trait::async_trait;
use russh::client::{self, Msg, Session};
use russh::Channel;
use russh_keys::key::PublicKey;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A channel the server opened for a connection accepted on our remote forward
pub(crate) struct ForwardedChannel {
    pub channel: Channel<Msg>,
    pub originator: String,
}

/// Per-session russh handler: checks the host key of one hop and hands
/// forwarded-tcpip channels over to the session's listener
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    verifier: Arc<HostKeyVerifier>,
    forwarded: mpsc::UnboundedSender<ForwardedChannel>,
}

impl ClientHandler {
    pub(crate) fn new(
        host: String,
        port: u16,
        verifier: Arc<HostKeyVerifier>,
        forwarded: mpsc::UnboundedSender<ForwardedChannel>,
    ) -> Self {
        Self {
            host,
            port,
            verifier,
            forwarded,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .verifier
            .verify(&self.host, self.port, server_public_key))
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let originator = format!("{}:{}", originator_address, originator_port);
        debug!(
            listen = %format!("{}:{}", connected_address, connected_port),
            peer = %originator,
            "Forwarded connection opened by server"
        );

        if self
            .forwarded
            .send(ForwardedChannel {
                channel,
                originator,
            })
            .is_err()
        {
            warn!("Forwarded connection dropped: listener is closed");
        }

        Ok(())
    }
}
