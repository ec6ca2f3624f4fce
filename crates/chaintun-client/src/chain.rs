//! Sequential multi-hop dialing

use crate::error::TunnelError;
use crate::state::{transition, TunnelState};
use chaintun_proto::HopSpec;
use chaintun_transport::{SecureSession, SessionConnector};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A hop whose session is up
pub struct EstablishedHop<S> {
    spec: HopSpec,
    session: S,
}

impl<S> EstablishedHop<S> {
    pub fn spec(&self) -> &HopSpec {
        &self.spec
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

/// Ordered list of established hops, always a prefix of the configured chain
pub struct ActiveChain<S: SecureSession> {
    hops: Vec<EstablishedHop<S>>,
}

impl<S: SecureSession> ActiveChain<S> {
    /// Dial every hop in order, each one through the previous session.
    ///
    /// On failure the hops already up are closed in reverse order and the
    /// error names the failing hop. Cancelling `shutdown` abandons the hop
    /// being dialed, closes the rest the same way and returns
    /// [`TunnelError::Cancelled`].
    pub async fn dial<C>(
        connector: &C,
        hops: &[HopSpec],
        state: &watch::Sender<TunnelState>,
        shutdown: &CancellationToken,
    ) -> Result<Self, TunnelError>
    where
        C: SessionConnector<Session = S>,
    {
        if hops.is_empty() {
            return Err(TunnelError::ChainIsEmpty);
        }

        let mut chain = ActiveChain {
            hops: Vec::with_capacity(hops.len()),
        };

        for (index, spec) in hops.iter().enumerate() {
            transition(state, TunnelState::DialingHop { index });
            info!(hop = %spec, index = index, "Dialing hop");

            let dial = async {
                match chain.hops.last() {
                    None => connector.connect(spec).await,
                    Some(parent) => connector.connect_via(&parent.session, spec).await,
                }
            };
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = dial => Some(result),
            };

            let Some(result) = result else {
                info!(hop = %spec, index = index, "Dial cancelled");
                transition(state, TunnelState::TearingDown);
                chain.close().await;
                return Err(TunnelError::Cancelled);
            };

            match result {
                Ok(session) => {
                    debug!(hop = %spec, index = index, "Hop established");
                    chain.hops.push(EstablishedHop {
                        spec: spec.clone(),
                        session,
                    });
                }
                Err(source) => {
                    warn!(hop = %spec, index = index, error = %source, "Failed to dial hop");
                    transition(state, TunnelState::TearingDown);
                    chain.close().await;
                    return Err(TunnelError::Dial {
                        index,
                        host_port: spec.host_port(),
                        source,
                    });
                }
            }
        }

        Ok(chain)
    }

    /// Session of the last hop, through which the remote listener is requested
    pub fn egress(&self) -> Option<&EstablishedHop<S>> {
        self.hops.last()
    }

    pub fn hops(&self) -> impl Iterator<Item = &HopSpec> {
        self.hops.iter().map(|hop| &hop.spec)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Close every session, innermost first
    pub async fn close(mut self) {
        while let Some(hop) = self.hops.pop() {
            debug!(hop = %hop.spec, "Closing hop");
            hop.session.close().await;
        }
    }
}
