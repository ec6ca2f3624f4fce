use chaintun_proto::{EndpointError, HopParseError};
use chaintun_transport::TransportError;
use thiserror::Error;

/// Errors that end one tunnel run (or prevent it from starting)
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("host chain is empty, must have at least one element")]
    ChainIsEmpty,

    #[error(transparent)]
    InvalidHop(#[from] HopParseError),

    #[error("invalid {what} address: {source}")]
    InvalidAddress {
        what: &'static str,
        #[source]
        source: EndpointError,
    },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("error dialing hop {index} ({host_port}): {source}")]
    Dial {
        index: usize,
        host_port: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("error accepting connection: {0}")]
    Accept(#[source] TransportError),

    #[error("tunnel run cancelled")]
    Cancelled,
}

impl TunnelError {
    /// True for failures that retrying cannot fix
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TunnelError::ChainIsEmpty
                | TunnelError::InvalidHop(_)
                | TunnelError::InvalidAddress { .. }
                | TunnelError::ConfigError(_)
        )
    }
}

/// Errors local to one proxied connection; logged, never escalated
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to connect to target {target}: {source}")]
    TargetUnreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_dial_error_names_hop() {
        let err = TunnelError::Dial {
            index: 1,
            host_port: "inner:22".to_string(),
            source: TransportError::ConnectionFailed("inner:22: refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("hop 1"));
        assert!(msg.contains("inner:22"));
        assert!(err.source().is_some());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_config_errors() {
        assert!(TunnelError::ChainIsEmpty.is_config_error());
        let parse = "nobody".parse::<chaintun_proto::HopSpec>().unwrap_err();
        assert!(TunnelError::from(parse).is_config_error());
        assert!(!TunnelError::Accept(TransportError::SessionClosed).is_config_error());
    }
}
