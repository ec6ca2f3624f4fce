//! `host:port` endpoint helpers

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid address format: '{0}' (expected host:port)")]
    MissingPort(String),

    #[error("invalid address format: '{0}' (host cannot be empty)")]
    EmptyHost(String),

    #[error("invalid port in address: '{0}'")]
    InvalidPort(String),
}

/// Split `host:port` (or `[v6]:port`) into its parts
pub fn split_host_port(addr: &str) -> Result<(String, u16), EndpointError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| EndpointError::MissingPort(addr.to_string()))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() {
        return Err(EndpointError::EmptyHost(addr.to_string()));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(addr.to_string()))?;

    Ok((host.to_string(), port))
}
