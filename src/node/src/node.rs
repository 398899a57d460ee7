//! Devnet simulation: a whole committee in one process

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use shardbft_consensus::devnet::{DevChain, DevMultiSig, InMemoryNetwork};
use shardbft_consensus::{Collaborators, ConsensusMetrics, DriverStats, RoundDriver};
use shardbft_core::{Hash, Layer, PublicKey};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use crate::config::NodeConfig;

/// Outcome of one simulated member
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub index: usize,
    pub key: PublicKey,
    pub online: bool,
    pub height: u64,
    pub best_hash: Hash,
    pub rounds: u64,
    pub finalized: u64,
    pub failed: u64,
    /// Blocks taken from peer announcements
    pub synced: u64,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub layer: String,
    pub committee_size: usize,
    pub nodes: Vec<NodeReport>,
}

impl SimulationReport {
    /// Every online member ended on the same best block
    pub fn converged(&self) -> bool {
        let mut online = self.nodes.iter().filter(|n| n.online);
        match online.next() {
            Some(first) => online.all(|n| n.best_hash == first.best_hash && n.height == first.height),
            None => false,
        }
    }

    /// Lowest height reached by an online member
    pub fn min_height(&self) -> u64 {
        self.nodes
            .iter()
            .filter(|n| n.online)
            .map(|n| n.height)
            .min()
            .unwrap_or(0)
    }
}

struct Member {
    key: PublicKey,
    chain: Arc<DevChain>,
    online: bool,
}

/// Committee of devnet members wired through an [`InMemoryNetwork`]
pub struct DevnetSimulation {
    config: NodeConfig,
    layer: Layer,
    members: Vec<Member>,
    drivers: Vec<(usize, RoundDriver)>,
    metrics: Vec<Arc<ConsensusMetrics>>,
    shutdown: CancellationToken,
}

/// Deterministic key of committee member `index`
pub fn member_key(seed: &str, index: usize) -> PublicKey {
    PublicKey::new(Hash::of(format!("{}/member/{}", seed, index).as_bytes()).as_bytes().to_vec())
}

impl DevnetSimulation {
    /// Build the committee described by `config`
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let devnet = &config.devnet;
        let layer = devnet.layer()?;
        let timing = config.consensus.timing();
        let seed = Hash::of(devnet.seed.as_bytes());
        let shutdown = CancellationToken::new();
        let network = InMemoryNetwork::new();

        let committee: Vec<PublicKey> = (0..devnet.committee_size)
            .map(|i| member_key(&devnet.seed, i))
            .collect();

        let mut members = Vec::with_capacity(committee.len());
        let mut drivers = Vec::new();
        let mut metrics = Vec::with_capacity(committee.len());

        for (index, key) in committee.iter().enumerate() {
            let chain = Arc::new(DevChain::new(key.clone(), layer, committee.clone()));
            let node_metrics = Arc::new(ConsensusMetrics::new().context("Failed to create metrics")?);
            let (handle, mailbox) = network.register(key.clone(), layer);
            let online = !devnet.offline.contains(&index);

            if online {
                let collaborators = Collaborators {
                    chain: chain.clone(),
                    network: Arc::new(handle),
                    signer: Arc::new(DevMultiSig::new(key.clone(), seed)),
                };
                let mut driver = RoundDriver::new(
                    key.clone(),
                    layer,
                    collaborators,
                    timing.clone(),
                    node_metrics.clone(),
                    mailbox,
                )
                .with_shutdown(shutdown.child_token())
                .with_target_height(devnet.target_blocks);
                if let Some(max) = devnet.max_rounds {
                    driver = driver.with_max_rounds(max);
                }
                drivers.push((index, driver));
            } else {
                network.set_online(key, false);
                info!(index, key = %key, "Member is offline");
            }

            members.push(Member {
                key: key.clone(),
                chain,
                online,
            });
            metrics.push(node_metrics);
        }

        info!(
            node = %config.node.id,
            %layer,
            committee = committee.len(),
            online = drivers.len(),
            target_blocks = devnet.target_blocks,
            "Devnet committee created"
        );

        Ok(Self {
            config,
            layer,
            members,
            drivers,
            metrics,
            shutdown,
        })
    }

    /// Cancelling this token stops every member
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Per-member metrics, in committee order
    pub fn metrics(&self) -> Vec<Arc<ConsensusMetrics>> {
        self.metrics.clone()
    }

    /// Run every online member until the target height, the round limit,
    /// or shutdown
    pub async fn run(mut self) -> Result<SimulationReport> {
        let drivers = std::mem::take(&mut self.drivers);
        let tasks = drivers.into_iter().map(|(index, driver)| async move {
            let result = tokio::spawn(driver.run()).await;
            (index, result)
        });

        let mut stats = vec![DriverStats::default(); self.members.len()];
        for (index, result) in join_all(tasks).await {
            match result {
                Ok(Ok(s)) => stats[index] = s,
                Ok(Err(e)) => {
                    error!(index, error = %e, "Member stopped with an error");
                    self.shutdown.cancel();
                    return Err(anyhow::anyhow!("member {} failed: {}", index, e));
                }
                Err(e) => {
                    self.shutdown.cancel();
                    return Err(anyhow::anyhow!("member {} panicked: {}", index, e));
                }
            }
        }

        let nodes = self
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| NodeReport {
                index,
                key: member.key.clone(),
                online: member.online,
                height: member.chain.height(),
                best_hash: member.chain.best_hash(),
                rounds: stats[index].rounds,
                finalized: stats[index].finalized,
                failed: stats[index].failed,
                synced: stats[index].synced,
            })
            .collect();

        let report = SimulationReport {
            layer: self.layer.to_string(),
            committee_size: self.members.len(),
            nodes,
        };
        if !report.converged() {
            warn!("Online members ended on different best blocks");
        }
        info!(
            node = %self.config.node.id,
            height = report.min_height(),
            converged = report.converged(),
            "Devnet simulation finished"
        );
        Ok(report)
    }
}

/// `/metrics/<index>` in Prometheus text format, plus `/health`
pub fn metrics_routes(
    metrics: Vec<Arc<ConsensusMetrics>>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let metrics = Arc::new(metrics);

    let member = warp::path!("metrics" / usize).and(warp::get()).map(move |index: usize| {
        match metrics.get(index).map(|m| m.export()) {
            Some(Ok(body)) => warp::reply::with_status(body, StatusCode::OK),
            Some(Err(e)) => warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
            None => warp::reply::with_status(format!("no member {}", index), StatusCode::NOT_FOUND),
        }
    });
    let health = warp::path!("health").and(warp::get()).map(|| "ok");

    member.or(health)
}

/// Serve [`metrics_routes`] until `shutdown` is cancelled
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Vec<Arc<ConsensusMetrics>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (bound, server) = warp::serve(metrics_routes(metrics))
        .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?;

    info!("Metrics server listening on http://{}/metrics/<member>", bound);
    server.await;
    Ok(())
}
