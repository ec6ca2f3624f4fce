//! Optional YAML configuration file

use anyhow::{Context, Result};
use chaintun_client::HostKeyPolicy;
use chaintun_proto::HopSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file format; every field may be overridden on the command line
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Private key file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    /// Environment variable holding the key passphrase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_passphrase_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_listen_addr: Option<String>,

    /// Hops in dialing order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub via: Vec<HopSpec>,

    /// Wait between attempts, e.g. `30s` or `2m`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_policy: Option<HostKeyPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

/// Load configuration from YAML file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
