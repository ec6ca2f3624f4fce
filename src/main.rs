//! chaintun - reverse tunnel through a chain of SSH hosts
//!
//! Opens a listener on the last host of the chain and forwards every
//! connection accepted there to a local target, reconnecting forever.

mod config_file;

use anyhow::{Context, Result};
use chaintun_client::{HostKeyPolicy, Supervisor, Tunnel, TunnelConfig};
use clap::Parser;
use config_file::{expand_home, load_config_file, ConfigFile};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// chaintun - reverse tunnel through a chain of SSH hosts
#[derive(Parser, Debug)]
#[command(name = "chaintun")]
#[command(about = "Reverse tunnel through a chain of SSH hosts")]
#[command(version = env!("GIT_TAG"))]
#[command(long_about = r#"
chaintun dials each --via host in order, every hop through the previous
one, asks the last host to listen on --remote-listen-addr and forwards
every connection accepted there to --target. When anything fails the
whole chain is torn down and dialed again after --reconnect.

EXAMPLES:
  # Expose local sshd on port 2222 of the inner host
  chaintun --key ~/.ssh/id_ed25519 \
    --via alice@bastion.example.com:22 \
    --via alice@10.0.0.5:22

  # Forward a local web server, reconnecting after 5 seconds
  chaintun --key ~/.ssh/id_ed25519 \
    --via alice@bastion.example.com:22 \
    --target localhost:8080 \
    --remote-listen-addr 0.0.0.0:8080 \
    --reconnect 5s

  # Use a config file
  chaintun --config chaintun.yaml --log-level debug

ENVIRONMENT VARIABLES:
  CHAINTUN_KEY                 Private key file
  CHAINTUN_KEY_PASSPHRASE      Passphrase of the private key
  CHAINTUN_TARGET              Target address to forward to (host:port)
  CHAINTUN_REMOTE_LISTEN_ADDR  Address to listen on at the last hop
"#)]
struct Args {
    /// Private key file used to authenticate with every hop
    #[arg(long, env = "CHAINTUN_KEY")]
    key: Option<PathBuf>,

    /// Passphrase of an encrypted private key
    #[arg(long, env = "CHAINTUN_KEY_PASSPHRASE", hide_env_values = true)]
    key_passphrase: Option<String>,

    /// Target address to forward connections to [default: localhost:22]
    #[arg(long, env = "CHAINTUN_TARGET")]
    target: Option<String>,

    /// Address to listen on at the last hop [default: localhost:2222]
    #[arg(long, env = "CHAINTUN_REMOTE_LISTEN_ADDR")]
    remote_listen_addr: Option<String>,

    /// Hop to tunnel through, user@host:port (repeat for each hop, in order)
    #[arg(long = "via", value_name = "USER@HOST:PORT")]
    via: Vec<String>,

    /// Wait before reconnecting, e.g. 30s, 2m, 500ms [default: 30s]
    #[arg(long, value_parser = parse_duration)]
    reconnect: Option<Duration>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// known_hosts file used to verify hop host keys [default: ~/.ssh/known_hosts]
    #[arg(long, conflicts_with = "insecure_ignore_host_key")]
    known_hosts: Option<PathBuf>,

    /// Accept any host key (insecure, for development only)
    #[arg(long)]
    insecure_ignore_host_key: bool,

    /// Maximum number of concurrently forwarded connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Parse `500ms`, `30s`, `2m`, `1h` or a bare number of seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split);

    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: '{}'", s))?;

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(format!(
                "invalid duration unit in '{}' (expected ms, s, m or h)",
                s
            ))
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: '{}'", s))
}

/// Setup logging; RUST_LOG wins over --log-level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("Invalid log level: {}", log_level))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_tunnel_config(args: Args) -> Result<TunnelConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let key_path = args
        .key
        .or(file.key)
        .map(|path| expand_home(&path))
        .context("Private key is required (use --key or config file)")?;

    let private_key = fs::read_to_string(&key_path)
        .with_context(|| format!("Failed to read private key: {}", key_path.display()))?;

    let key_passphrase = match (args.key_passphrase, &file.key_passphrase_env) {
        (Some(passphrase), _) => Some(passphrase),
        (None, Some(var)) => Some(
            std::env::var(var)
                .with_context(|| format!("Environment variable {} not set", var))?,
        ),
        (None, None) => None,
    };

    let reconnect_wait = match (args.reconnect, &file.reconnect) {
        (Some(wait), _) => Some(wait),
        (None, Some(raw)) => Some(parse_duration(raw).map_err(anyhow::Error::msg)?),
        (None, None) => None,
    };

    let host_key_policy = if args.insecure_ignore_host_key {
        HostKeyPolicy::AcceptAny
    } else if let Some(path) = args.known_hosts {
        HostKeyPolicy::known_hosts_file(expand_home(&path))
    } else {
        file.host_key_policy.unwrap_or_default()
    };

    let mut builder = TunnelConfig::builder()
        .private_key(private_key)
        .key_passphrase(key_passphrase)
        .host_key_policy(host_key_policy)
        .max_connections(args.max_connections.or(file.max_connections));

    if let Some(target) = args.target.or(file.target) {
        builder = builder.target(target);
    }
    if let Some(addr) = args.remote_listen_addr.or(file.remote_listen_addr) {
        builder = builder.remote_listen_addr(addr);
    }
    if let Some(wait) = reconnect_wait {
        builder = builder.reconnect_wait(wait);
    }

    // Hops from the command line replace the ones in the file
    if args.via.is_empty() {
        for hop in file.via {
            builder = builder.hop(hop);
        }
    } else {
        for hop in args.via {
            builder = builder.via(hop);
        }
    }

    builder.build().context("Invalid tunnel configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!(
        version = env!("GIT_TAG"),
        commit = env!("GIT_HASH"),
        built = env!("BUILD_TIME"),
        "chaintun starting"
    );

    let config = build_tunnel_config(args)?;

    let hops: Vec<String> = config.hops.iter().map(ToString::to_string).collect();
    info!("Hops: {}", hops.join(" -> "));
    info!("Remote listen address: {}", config.remote_listen_addr);
    info!("Target: {}", config.target);
    if config.host_key_policy.is_insecure() {
        warn!("Host key verification disabled (insecure mode)");
    }

    let tunnel = Tunnel::new(config).context("Failed to create tunnel")?;
    let supervisor = Supervisor::new(tunnel);

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        ctrl_c_token.cancel();
    });

    supervisor.run(shutdown).await;

    info!("chaintun stopped");
    Ok(())
}
