//! Host identity verification

use russh_keys::key::PublicKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// How server host keys are checked for every hop in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Require the key to be listed in a known_hosts file
    /// (`~/.ssh/known_hosts` when no path is given)
    KnownHosts {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Accept whatever key the server presents (INSECURE)
    AcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts { path: None }
    }
}

impl HostKeyPolicy {
    pub fn known_hosts_file(path: impl Into<PathBuf>) -> Self {
        HostKeyPolicy::KnownHosts {
            path: Some(path.into()),
        }
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::AcceptAny)
    }
}

/// Applies a [`HostKeyPolicy`] to keys presented during the handshake
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &HostKeyPolicy {
        &self.policy
    }

    /// Returns true when the handshake with `host:port` may proceed
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        let result = match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(host = %host, port = port, "Accepting host key without verification");
                return true;
            }
            HostKeyPolicy::KnownHosts { path: None } => {
                russh_keys::check_known_hosts(host, port, key)
            }
            HostKeyPolicy::KnownHosts { path: Some(path) } => {
                russh_keys::check_known_hosts_path(host, port, key, path)
            }
        };

        match result {
            Ok(true) => {
                debug!(host = %host, port = port, "Host key verified");
                true
            }
            Ok(false) => {
                warn!(host = %host, port = port, "Host key not found in known_hosts");
                false
            }
            Err(e) => {
                warn!(host = %host, port = port, error = %e, "Host key verification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_verifies() {
        let policy = HostKeyPolicy::default();
        assert_eq!(policy, HostKeyPolicy::KnownHosts { path: None });
        assert!(!policy.is_insecure());
        assert!(HostKeyPolicy::AcceptAny.is_insecure());
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: HostKeyPolicy = serde_yaml::from_str("mode: accept_any").unwrap();
        assert_eq!(policy, HostKeyPolicy::AcceptAny);

        let policy: HostKeyPolicy =
            serde_yaml::from_str("mode: known_hosts\npath: /etc/ssh/ssh_known_hosts").unwrap();
        assert_eq!(
            policy,
            HostKeyPolicy::known_hosts_file("/etc/ssh/ssh_known_hosts")
        );

        let policy: HostKeyPolicy = serde_yaml::from_str("mode: known_hosts").unwrap();
        assert_eq!(policy, HostKeyPolicy::default());
    }
}
