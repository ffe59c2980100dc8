//! Weft daemon - runs one overlay node.
//!
//! Starts a node on the given port, optionally joining an existing mesh
//! through a bootstrap address; without one the node founds a new mesh as
//! its sole member. Ctrl-C triggers a graceful leave.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use weft_core::Id;
use weft_overlay::{OverlayConfig, OverlayNode};

/// Weft overlay node daemon.
#[derive(Parser)]
#[command(name = "weftd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node identifier as up to 40 hex digits; random when omitted.
    #[arg(long)]
    id: Option<String>,

    /// TCP port to listen on (0 picks an ephemeral port).
    #[arg(short, long, default_value_t = 4040)]
    port: u16,

    /// Address of an existing mesh member; omit to found a new mesh.
    #[arg(short, long)]
    bootstrap: Option<SocketAddr>,

    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Loads the `[overlay]` section of a TOML file over the defaults.
fn load_config(path: Option<&PathBuf>) -> Result<OverlayConfig> {
    let mut config = OverlayConfig::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let toml: toml::Value = content.parse().context("failed to parse config file")?;

    if let Some(overlay) = toml.get("overlay") {
        if let Some(secs) = overlay.get("republish_period_secs").and_then(|v| v.as_integer()) {
            config.republish_period = Duration::from_secs(secs as u64);
        }
        if let Some(secs) = overlay.get("advertise_ttl_secs").and_then(|v| v.as_integer()) {
            config.advertise_ttl = Duration::from_secs(secs as u64);
        }
        if let Some(secs) = overlay.get("rpc_timeout_secs").and_then(|v| v.as_integer()) {
            config.rpc_timeout = Duration::from_secs(secs as u64);
        }
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set up logging")?;

    let config = load_config(cli.config.as_ref())?;
    let id = cli
        .id
        .as_deref()
        .map(Id::from_prefix)
        .transpose()
        .context("invalid node identifier")?;

    let listen: SocketAddr = format!("0.0.0.0:{}", cli.port)
        .parse()
        .context("invalid listen address")?;

    let node = OverlayNode::start(id, listen, cli.bootstrap, config)
        .await
        .context("failed to start node")?;

    println!("weftd running");
    println!("  node id: {}", node.id().to_hex());
    println!("  listen:  {}", node.addr());
    match cli.bootstrap {
        Some(addr) => println!("  joined via {addr}"),
        None => println!("  founded a new mesh"),
    }
    println!();
    println!("Press Ctrl+C to leave the mesh and stop");

    signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    info!("shutting down");
    node.leave().await.context("graceful leave failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.republish_period, Duration::from_secs(10));
        assert_eq!(config.advertise_ttl, Duration::from_secs(25));
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_cli_parses_bootstrap() {
        let cli = Cli::parse_from([
            "weftd",
            "--port",
            "4100",
            "--bootstrap",
            "127.0.0.1:4040",
            "-vv",
        ]);
        assert_eq!(cli.port, 4100);
        assert_eq!(cli.bootstrap, Some("127.0.0.1:4040".parse().unwrap()));
        assert_eq!(cli.verbose, 2);
    }
}
