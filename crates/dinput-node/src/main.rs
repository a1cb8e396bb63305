//! dinput-node entry point.
//!
//! Loads the configuration, binds the source and sink TCP endpoints, and
//! runs both event loops until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- TOML file or defaults
//!  └─ TcpTransport::bind() x2   -- source endpoint, sink endpoint
//!  └─ Node::spawn()
//!       ├─ source loop          (requests, relays, injection, latency ticker)
//!       └─ sink loop            (grants, capture, event batches)
//! ```
//!
//! `--demo` instead runs a three-node relay walkthrough on the in-process
//! hub and exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dinput_core::DeviceId;
use dinput_node::infrastructure::hardware::simulated::SimulatedHardware;
use dinput_node::infrastructure::hardware::LoggingInjector;
use dinput_node::infrastructure::network::tcp::{PeerAddrs, SessionIds, TcpTransport};
use dinput_node::infrastructure::runtime::{Node, NodeHardware, NodeSettings, RoleEndpoint};
use dinput_node::infrastructure::storage::config::{self, NodeConfig};

mod demo;

/// Distributed input sharing node
#[derive(Parser, Debug)]
#[command(name = "dinput-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run an in-process three-node relay walkthrough and exit
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading platform config")?,
    };

    // Structured logging.  `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.node.log_level)),
        )
        .init();

    if args.demo {
        return demo::run().await;
    }
    run_node(cfg).await
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let local_id = cfg.device_id();
    info!(device = %local_id, "dinput node starting");

    let mut peers = HashMap::new();
    for peer in &cfg.peers {
        let (source, sink) = peer.addresses()?;
        peers.insert(DeviceId::new(peer.device_id.clone()), PeerAddrs { source, sink });
    }
    let peers = Arc::new(peers);
    let ids = SessionIds::default();

    // ── Transport endpoints ───────────────────────────────────────────────────
    let (source_tx, source_events) = mpsc::unbounded_channel();
    let source_transport = TcpTransport::bind(
        local_id.clone(),
        cfg.source_listen_addr()?,
        Arc::clone(&peers),
        ids.clone(),
        source_tx,
    )
    .await?;
    let (sink_tx, sink_events) = mpsc::unbounded_channel();
    let sink_transport = TcpTransport::bind(
        local_id.clone(),
        cfg.sink_listen_addr()?,
        peers,
        ids,
        sink_tx,
    )
    .await?;

    // ── Hardware ──────────────────────────────────────────────────────────────
    let (hardware, captured) = SimulatedHardware::new(cfg.sink.devices.clone());
    info!(devices = cfg.sink.devices.len(), "simulated collector ready");

    let node = Node::spawn(
        local_id,
        RoleEndpoint {
            transport: Box::new(source_transport),
            events: source_events,
        },
        RoleEndpoint {
            transport: Box::new(sink_transport),
            events: sink_events,
        },
        NodeHardware {
            collector: Box::new(hardware.collector()),
            captured,
            injector: Box::new(LoggingInjector::default()),
        },
        NodeSettings::from_config(&cfg),
    );

    info!("dinput node ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    node.shutdown().await;
    Ok(())
}
