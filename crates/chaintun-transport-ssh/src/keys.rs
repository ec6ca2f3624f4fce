//! Private key decoding

use chaintun_transport::{TransportError, TransportResult};
use russh_keys::key::KeyPair;
use std::sync::Arc;

/// Decode an OpenSSH/PEM private key into the credential shared by all hops
pub fn decode_private_key(material: &str, passphrase: Option<&str>) -> TransportResult<Arc<KeyPair>> {
    if material.trim().is_empty() {
        return Err(TransportError::InvalidKey("key material is empty".to_string()));
    }

    russh_keys::decode_secret_key(material, passphrase)
        .map(Arc::new)
        .map_err(|e| TransportError::InvalidKey(e.to_string()))
}
