//! ShardBFT devnet node - main binary
//!
//! Runs a simulated committee through the four-phase BFT round:
//! - Listen / Propose / Agree / Commit per block
//! - In-memory gossip between members
//! - Prometheus metrics per member

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardbft_node::{run_metrics_server, DevnetSimulation, NodeConfig, SimulationReport};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// ShardBFT devnet CLI
#[derive(Parser)]
#[command(name = "shardbft-node")]
#[command(about = "ShardBFT - four-phase BFT consensus devnet")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SHARDBFT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a devnet committee until the target height (default)
    Simulate {
        /// Committee size
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Blocks to finalize before stopping
        #[arg(short, long)]
        target_blocks: Option<u64>,

        /// Committee indexes that stay offline
        #[arg(long, value_delimiter = ',')]
        offline: Vec<usize>,

        /// "beacon" or "shard"
        #[arg(long)]
        layer: Option<String>,

        /// Shard id when running on a shard
        #[arg(long)]
        shard_id: Option<u8>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Show node version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { config.node.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},shardbft_consensus={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_ansi(config.node.colored_logs)
        .init();

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    match cli.command.unwrap_or(Command::Simulate {
        nodes: None,
        target_blocks: None,
        offline: Vec::new(),
        layer: None,
        shard_id: None,
        json: false,
    }) {
        Command::Version => {
            println!("ShardBFT Node v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(())
        }
        Command::Simulate {
            nodes,
            target_blocks,
            offline,
            layer,
            shard_id,
            json,
        } => {
            // Apply CLI overrides
            if let Some(nodes) = nodes {
                config.devnet.committee_size = nodes;
            }
            if let Some(target) = target_blocks {
                config.devnet.target_blocks = target;
            }
            if !offline.is_empty() {
                config.devnet.offline = offline;
            }
            if let Some(layer) = layer {
                config.devnet.layer = layer;
            }
            if let Some(shard_id) = shard_id {
                config.devnet.shard_id = shard_id;
            }

            let report = simulate(config).await?;
            print_report(&report, json)
        }
    }
}

async fn simulate(config: NodeConfig) -> Result<SimulationReport> {
    info!("Starting ShardBFT devnet v{}", env!("CARGO_PKG_VERSION"));

    let metrics_addr: Option<SocketAddr> = if config.metrics.enabled {
        let addr = format!("{}:{}", config.metrics.host, config.metrics.port);
        Some(addr.parse().with_context(|| format!("Invalid metrics address {}", addr))?)
    } else {
        None
    };

    let simulation = DevnetSimulation::new(config)?;
    let shutdown = simulation.shutdown_token();

    let metrics_shutdown = CancellationToken::new();
    let metrics_task = metrics_addr.map(|addr| {
        tokio::spawn(run_metrics_server(addr, simulation.metrics(), metrics_shutdown.clone()))
    });

    let run = tokio::spawn(simulation.run());
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("Received shutdown signal (Ctrl+C)"),
            _ = shutdown_signal() => info!("Received shutdown signal (SIGTERM)"),
        }
        shutdown.cancel();
    });

    let report = run.await.context("Simulation task panicked")?;

    metrics_shutdown.cancel();
    if let Some(task) = metrics_task {
        match task.await {
            Ok(Err(e)) => warn!("Metrics server error: {:#}", e),
            Err(e) => warn!("Metrics server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    match &report {
        Ok(_) => info!("Devnet stopped gracefully"),
        Err(e) => error!("Devnet error: {:#}", e),
    }
    report
}

fn print_report(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("layer {} with {} members", report.layer, report.committee_size);
    for node in &report.nodes {
        let status = if node.online { "online" } else { "offline" };
        println!(
            "  #{:<3} {:<7} height {:<4} rounds {:<4} finalized {:<4} synced {:<4} failed {:<4} best {}",
            node.index, status, node.height, node.rounds, node.finalized, node.synced, node.failed, node.best_hash
        );
    }
    println!("converged: {}", report.converged());
    Ok(())
}

/// Cross-platform shutdown signal handling
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix systems, only Ctrl+C is supported
    std::future::pending::<()>().await
}
