//! Per-connection forwarding to the target

use crate::error::ProxyError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_to_target: u64,
    pub bytes_to_inbound: u64,
}

/// Hands out connection ids and counts live connections
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    next_id: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Count a connection as live until the guard is dropped
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active: self.active.clone(),
        }
    }
}

pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dials the target for each accepted connection and splices the two together
#[derive(Debug, Clone)]
pub struct ConnectionProxy {
    target: Arc<str>,
}

impl ConnectionProxy {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Arc::from(target.into()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forward one accepted connection until either side closes.
    ///
    /// If the target cannot be reached the inbound stream is shut down and
    /// dropped without relaying anything.
    pub async fn forward<S>(
        &self,
        connection_id: u64,
        peer: &str,
        mut inbound: S,
        shutdown: CancellationToken,
    ) -> Result<RelayStats, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let outbound = match TcpStream::connect(&*self.target).await {
            Ok(stream) => stream,
            Err(source) => {
                let _ = inbound.shutdown().await;
                return Err(ProxyError::TargetUnreachable {
                    target: self.target.to_string(),
                    source,
                });
            }
        };
        let _ = outbound.set_nodelay(true);

        tracing::debug!(
            connection_id = connection_id,
            peer = %peer,
            target = %self.target,
            "Connected to target"
        );

        let stats = relay(inbound, outbound, shutdown).await;

        tracing::debug!(
            connection_id = connection_id,
            peer = %peer,
            bytes_to_target = stats.bytes_to_target,
            bytes_to_inbound = stats.bytes_to_inbound,
            "Connection closed"
        );

        Ok(stats)
    }
}

/// Copy bytes both ways between `a` and `b`.
///
/// Each direction runs in its own task. As soon as one direction ends (EOF,
/// error or `shutdown`) both streams are shut down and the other direction
/// stops too.
pub async fn relay<A, B>(a: A, b: B, shutdown: CancellationToken) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let done = shutdown.child_token();

    let to_target = tokio::spawn(copy_until_done(a_read, b_write, done.clone()));
    let to_inbound = tokio::spawn(copy_until_done(b_read, a_write, done));

    let (to_target, to_inbound) = tokio::join!(to_target, to_inbound);

    RelayStats {
        bytes_to_target: to_target.unwrap_or_default(),
        bytes_to_inbound: to_inbound.unwrap_or_default(),
    }
}

async fn copy_until_done<R, W>(mut reader: R, mut writer: W, done: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total_bytes = 0u64;
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = done.cancelled() => break,
            result = reader.read(&mut buffer) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "Relay read failed");
                    break;
                }
            },
        };

        let written = tokio::select! {
            _ = done.cancelled() => break,
            result = writer.write_all(&buffer[..n]) => result,
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "Relay write failed");
            break;
        }
        total_bytes += n as u64;
    }

    done.cancel();
    let _ = writer.shutdown().await;
    total_bytes
}
