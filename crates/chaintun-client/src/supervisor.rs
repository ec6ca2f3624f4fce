//! Restarts the tunnel after every run, forever

use crate::tunnel::Tunnel;
use chaintun_transport::SessionConnector;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Re-runs a [`Tunnel`] with a fixed wait between attempts.
///
/// Every attempt re-dials the chain from the first hop. There is no backoff
/// and no retry limit; only the shutdown token stops it.
pub struct Supervisor<C: SessionConnector> {
    tunnel: Tunnel<C>,
    reconnect_wait: Duration,
}

impl<C: SessionConnector> Supervisor<C> {
    pub fn new(tunnel: Tunnel<C>) -> Self {
        let reconnect_wait = tunnel.config().reconnect_wait;
        Self {
            tunnel,
            reconnect_wait,
        }
    }

    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    pub fn tunnel(&self) -> &Tunnel<C> {
        &self.tunnel
    }

    pub fn reconnect_wait(&self) -> Duration {
        self.reconnect_wait
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            info!(attempt = attempt, "Starting tunnel");

            match self.tunnel.run(&shutdown).await {
                Ok(()) => info!(attempt = attempt, "Tunnel run finished"),
                Err(e) => error!(attempt = attempt, error = %e, "Tunnel run failed"),
            }

            if shutdown.is_cancelled() {
                break;
            }

            info!(
                wait_secs = self.reconnect_wait.as_secs_f64(),
                "Waiting before attempting new connection"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_wait) => {}
            }
        }

        info!("Supervisor stopped");
    }
}
