//! One tunnel lifecycle: dial the chain, acquire the remote listener, accept

use crate::chain::ActiveChain;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::proxy::{ConnectionProxy, ConnectionTracker};
use crate::state::{transition, TunnelState};
use chaintun_transport::{Accepted, RemoteListener, SecureSession, SessionConnector};
use chaintun_transport_ssh::SshConnector;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the configuration, the connector and (while running) the hop chain
/// and the remote listener
pub struct Tunnel<C: SessionConnector = SshConnector> {
    config: TunnelConfig,
    connector: C,
    proxy: ConnectionProxy,
    tracker: ConnectionTracker,
    limiter: Option<Arc<Semaphore>>,
    state: watch::Sender<TunnelState>,
}

impl Tunnel<SshConnector> {
    /// Validate the configuration and decode the private key.
    ///
    /// Nothing touches the network here.
    pub fn new(config: TunnelConfig) -> Result<Self, TunnelError> {
        config.validate()?;

        let connector = SshConnector::new(
            config.private_key.expose(),
            config.key_passphrase.as_deref(),
            config.host_key_policy.clone(),
        )
        .map_err(|e| TunnelError::ConfigError(e.to_string()))?;

        Self::with_connector(config, connector)
    }
}

impl<C: SessionConnector> Tunnel<C> {
    pub fn with_connector(config: TunnelConfig, connector: C) -> Result<Self, TunnelError> {
        config.validate()?;

        let (state, _) = watch::channel(TunnelState::Idle);
        Ok(Self {
            proxy: ConnectionProxy::new(config.target.clone()),
            limiter: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            tracker: ConnectionTracker::new(),
            config,
            connector,
            state,
        })
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Number of proxied connections currently open
    pub fn active_connections(&self) -> usize {
        self.tracker.active()
    }

    /// Run one full lifecycle.
    ///
    /// Returns `Ok(())` when `shutdown` fires or the remote listener closes,
    /// and an error when dialing, listening or accepting fails. Everything
    /// established during the run is torn down before returning.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), TunnelError> {
        let result = match self.run_once(shutdown).await {
            Err(TunnelError::Cancelled) => Ok(()),
            other => other,
        };
        transition(&self.state, TunnelState::Idle);
        result
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), TunnelError> {
        let chain =
            ActiveChain::dial(&self.connector, &self.config.hops, &self.state, shutdown).await?;
        let egress = chain.egress().ok_or(TunnelError::ChainIsEmpty)?;
        let addr = &self.config.remote_listen_addr;

        transition(&self.state, TunnelState::ListenerRequested);
        let requested = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = egress.session().listen(addr) => Some(result),
        };
        let mut listener = match requested {
            Some(Ok(listener)) => listener,
            None => {
                info!(listen = %addr, "Listener request cancelled");
                transition(&self.state, TunnelState::TearingDown);
                chain.close().await;
                return Err(TunnelError::Cancelled);
            }
            Some(Err(source)) => {
                warn!(listen = %addr, hop = %egress.spec(), error = %source, "Remote listener refused");
                transition(&self.state, TunnelState::TearingDown);
                chain.close().await;
                return Err(TunnelError::Listen {
                    addr: addr.clone(),
                    source,
                });
            }
        };

        transition(&self.state, TunnelState::Listening);
        info!(
            listen = %listener.listen_addr(),
            hop = %egress.spec(),
            target = %self.config.target,
            hops = chain.len(),
            "Tunnel established"
        );

        let result = self.accept_loop(&mut listener, shutdown).await;

        transition(&self.state, TunnelState::TearingDown);
        debug!("Tearing down tunnel");
        listener.close().await;
        chain.close().await;
        info!("Tunnel closed");

        result
    }

    async fn accept_loop<L: RemoteListener>(
        &self,
        listener: &mut L,
        shutdown: &CancellationToken,
    ) -> Result<(), TunnelError> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping accept loop");
                    return Ok(());
                }
                result = listener.accept() => result,
            };

            match accepted {
                Ok(Some(connection)) => self.dispatch(connection, shutdown),
                Ok(None) => {
                    info!(listen = %listener.listen_addr(), "Remote listener closed");
                    return Ok(());
                }
                Err(e) => return Err(TunnelError::Accept(e)),
            }
        }
    }

    /// Hand an accepted connection to its own proxy task
    fn dispatch<S>(&self, connection: Accepted<S>, shutdown: &CancellationToken)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let Accepted { stream, peer } = connection;
        let connection_id = self.tracker.next_id();

        let permit = match &self.limiter {
            Some(limiter) => match limiter.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        connection_id = connection_id,
                        peer = %peer,
                        "Connection limit reached, closing connection"
                    );
                    drop(stream);
                    return;
                }
            },
            None => None,
        };

        info!(
            connection_id = connection_id,
            peer = %peer,
            target = %self.proxy.target(),
            "Accepted connection"
        );

        let guard = self.tracker.track();
        let proxy = self.proxy.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            if let Err(e) = proxy.forward(connection_id, &peer, stream, shutdown).await {
                warn!(connection_id = connection_id, peer = %peer, error = %e, "Proxy failed");
            }
        });
    }
}

impl<C: SessionConnector> std::fmt::Debug for Tunnel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}
