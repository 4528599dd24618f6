//! Mitosis mesh binary.
//!
//! Runs one signal and a number of newbie nodes in-process over the loopback
//! transport on the wall clock, and logs how the topology forms around the
//! signal until Ctrl+C or the configured run time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mitosis_core::{Address, Clock, Protocol, RoleType, SystemClock};
use mitosis_mesh::LoopbackNetwork;
use mitosis_node_lib::{MeshNode, NodeConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Peer id of the signal when none is configured.
const DEFAULT_SIGNAL_ID: &str = "signal";

/// Mitosis local mesh.
#[derive(Parser, Debug)]
#[command(
    name = "mitosis-node",
    version,
    about = "Run a self-organizing Mitosis mesh of in-process nodes"
)]
struct Args {
    /// TOML configuration file; MITOSIS_* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of newbie nodes joining through the signal
    #[arg(long, default_value_t = 8)]
    nodes: usize,

    /// Tick interval in milliseconds (overrides the configuration)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

/// How the local mesh is run, next to the per-node configuration.
struct RunOptions {
    nodes: usize,
    duration: Option<Duration>,
    log_format: String,
}

impl Args {
    /// Load the node configuration and apply CLI overrides.
    fn into_config(self) -> Result<(NodeConfig, RunOptions)> {
        let mut config =
            NodeConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.mesh.tick_interval_ms = tick_ms;
        }
        config.validate().context("invalid configuration")?;

        let run = RunOptions {
            nodes: self.nodes,
            duration: self.duration_secs.map(Duration::from_secs),
            log_format: self.log_format,
        };
        Ok((config, run))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, run) = args.into_config()?;

    init_logging(&config.log_level, &run.log_format);

    info!("Mitosis mesh v{}", env!("CARGO_PKG_VERSION"));
    info!("nodes: {}", run.nodes);
    info!("tick_interval_ms: {}", config.mesh.tick_interval_ms);

    let network = LoopbackNetwork::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    let signal_address = config
        .signal_address()?
        .unwrap_or_else(|| Address::direct(DEFAULT_SIGNAL_ID, Protocol::WebSocket));
    let signal_config = NodeConfig {
        peer_id: Some(signal_address.peer_id().to_string()),
        roles: vec![RoleType::Signal],
        ..config.clone()
    };
    let signal = build_node(&network, &signal_config, &clock)?;
    info!(signal = %signal_address, "signal ready");

    let mut handles = vec![spawn_node(signal, stop_rx.clone())];
    for index in 0..run.nodes {
        let node_config = NodeConfig {
            peer_id: Some(format!("node-{index:02}")),
            ..config.clone()
        };
        let mut node = build_node(&network, &node_config, &clock)?;
        node.connect_to_signal(signal_address.clone())
            .with_context(|| format!("{} cannot reach the signal", node.my_id()))?;
        handles.push(spawn_node(node, stop_rx.clone()));
    }

    info!("mesh running (Ctrl+C to stop)");
    let run_for = async {
        match run.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C, shutting down...");
        }
        _ = run_for => {
            info!("run time elapsed, shutting down...");
        }
    }

    stop_tx.send(true).ok();
    for handle in handles {
        match handle.await {
            Ok(node) => info!(summary = %node.summary(), "final topology"),
            Err(e) => warn!("node task failed: {e}"),
        }
    }
    info!("Mitosis mesh shutdown complete");
    Ok(())
}

/// Create a node on the loopback network with every loopback protocol.
fn build_node(network: &LoopbackNetwork, config: &NodeConfig, clock: &Arc<dyn Clock>) -> Result<MeshNode> {
    let mut node = MeshNode::from_config(config, Arc::clone(clock))
        .context("failed to create mesh node")?;
    network.register(node.my_id(), node.sink());
    for protocol in [
        Protocol::WebSocket,
        Protocol::WebSocketUnsecure,
        Protocol::WebRtcData,
        Protocol::WebRtcStream,
    ] {
        node.register_transport(protocol, network.transport(protocol));
    }
    Ok(node)
}

fn spawn_node(node: MeshNode, mut stop: watch::Receiver<bool>) -> JoinHandle<MeshNode> {
    tokio::spawn(node.run(async move {
        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }
    }))
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
