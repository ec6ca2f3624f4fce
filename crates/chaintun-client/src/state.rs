//! Run state of a tunnel

use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Where a single tunnel run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    Idle,
    /// Establishing the session to hop `index` (0-based)
    DialingHop { index: usize },
    ListenerRequested,
    Listening,
    TearingDown,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Idle => write!(f, "idle"),
            TunnelState::DialingHop { index } => write!(f, "dialing hop {}", index),
            TunnelState::ListenerRequested => write!(f, "listener requested"),
            TunnelState::Listening => write!(f, "listening"),
            TunnelState::TearingDown => write!(f, "tearing down"),
        }
    }
}

pub(crate) fn transition(tx: &watch::Sender<TunnelState>, next: TunnelState) {
    let previous = tx.send_replace(next);
    if previous != next {
        debug!(from = %previous, to = %next, "Tunnel state changed");
    }
}
