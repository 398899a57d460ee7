//! Finalized block propagation
//!
//! A node that inserts a block announces it to its committee. Members that
//! missed a round insert the announced block when it extends their chain;
//! members further behind ask the announcer for the missing range with
//! [`GetBlocks`] and receive the blocks one [`BlockAnnounce`] at a time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use shardbft_core::{ChainCollaborator, Layer, MultiSigned, PendingBlock, PublicKey};
use tracing::{debug, info, warn};

use crate::engine::Collaborators;
use crate::error::Result;
use crate::message::{BftMessage, BlockAnnounce, GetBlocks};
use crate::metrics::ConsensusMetrics;
use crate::network::NetworkCollaborator;

/// Blocks sent in answer to one [`GetBlocks`]
pub const MAX_BLOCKS_PER_SYNC: u64 = 64;

/// Announce message for a finalized block
pub fn announcement(block: &PendingBlock, sender: PublicKey) -> Result<BftMessage> {
    let header = block.header();
    Ok(BlockAnnounce::new(header.round, header.prev_hash, sender, header.height, block.to_bytes()?).into())
}

/// Announces this node's blocks and applies blocks announced by peers
pub struct BlockSync {
    own_key: PublicKey,
    layer: Layer,
    chain: Arc<dyn ChainCollaborator>,
    network: Arc<dyn NetworkCollaborator>,
    metrics: Arc<ConsensusMetrics>,
}

impl BlockSync {
    pub fn new(own_key: PublicKey, layer: Layer, collaborators: &Collaborators, metrics: Arc<ConsensusMetrics>) -> Self {
        Self {
            own_key,
            layer,
            chain: collaborators.chain.clone(),
            network: collaborators.network.clone(),
            metrics,
        }
    }

    /// Best-effort broadcast of a block this node just inserted
    pub async fn announce(&self, block: &PendingBlock) {
        let msg = match announcement(block, self.own_key.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(height = block.height(), error = %e, "Failed to encode block announcement");
                return;
            }
        };
        let exclude = HashSet::from([self.own_key.clone()]);
        if let Err(e) = self.network.push(self.layer, &msg, &exclude).await {
            warn!(height = block.height(), error = %e, "Block announcement failed");
        }
    }

    /// Insert announced blocks that extend the chain, in height order.
    /// When an announcement reaches past the blocks at hand, the missing
    /// range is requested from the peer that announced the highest block.
    /// Returns how many blocks were inserted.
    pub async fn apply(&self, blocks: Vec<BlockAnnounce>, round: u64) -> Result<u64> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let mut best = self.chain.best_height(self.layer).await?;

        let mut by_height: BTreeMap<u64, Vec<BlockAnnounce>> = BTreeMap::new();
        let mut highest: Option<(u64, PublicKey)> = None;
        for announce in blocks {
            if announce.height <= best {
                continue;
            }
            if highest.as_ref().map_or(true, |(height, _)| announce.height > *height) {
                highest = Some((announce.height, announce.sender.clone()));
            }
            by_height.entry(announce.height).or_default().push(announce);
        }

        let mut inserted = 0;
        while let Some(candidates) = by_height.remove(&(best + 1)) {
            if !self.insert_first_valid(candidates).await {
                break;
            }
            best += 1;
            inserted += 1;
            self.metrics.blocks_synced.inc();
        }
        if inserted > 0 {
            info!(layer = %self.layer, inserted, height = best, "Caught up from announced blocks");
        }

        if let Some((height, peer)) = highest.filter(|(height, _)| *height > best) {
            let from_height = best + 1;
            let request: BftMessage = GetBlocks::new(
                round,
                self.chain.best_state_hash(self.layer).await?,
                self.own_key.clone(),
                from_height,
            )
            .into();
            info!(%peer, from_height, announced = height, "Requesting missing blocks");
            if let Err(e) = self.network.send_to_peer(self.layer, &peer, &request).await {
                warn!(%peer, error = %e, "Block request failed");
            }
        }
        Ok(inserted)
    }

    async fn insert_first_valid(&self, candidates: Vec<BlockAnnounce>) -> bool {
        for announce in candidates {
            let block = match PendingBlock::from_bytes(self.layer, &announce.block) {
                Ok(block) => block,
                Err(e) => {
                    warn!(sender = %announce.sender, error = %e, "Undecodable announced block");
                    continue;
                }
            };
            if block.height() != announce.height || block.header().prev_hash != announce.best_state_hash {
                warn!(sender = %announce.sender, height = announce.height, "Announcement does not match its block");
                continue;
            }
            match self.chain.insert_block(block).await {
                Ok(()) => return true,
                Err(e) => debug!(sender = %announce.sender, height = announce.height, error = %e, "Announced block rejected"),
            }
        }
        false
    }
}

/// Answer a [`GetBlocks`] off the phase loop. Only reads the chain.
pub(crate) fn spawn_block_server(
    chain: Arc<dyn ChainCollaborator>,
    network: Arc<dyn NetworkCollaborator>,
    own_key: PublicKey,
    layer: Layer,
    request: GetBlocks,
    metrics: Arc<ConsensusMetrics>,
) {
    tokio::spawn(async move {
        let best = match chain.best_height(layer).await {
            Ok(best) => best,
            Err(e) => {
                warn!(%layer, error = %e, "Best height unavailable, ignoring block request");
                return;
            }
        };
        let from = request.from_height.max(1);
        if from > best {
            return;
        }
        let last = best.min(from.saturating_add(MAX_BLOCKS_PER_SYNC - 1));
        debug!(peer = %request.sender, from, last, "Serving blocks");

        for height in from..=last {
            let block = match chain.get_block(layer, height).await {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    warn!(height, error = %e, "Block lookup failed");
                    break;
                }
            };
            let msg = match announcement(&block, own_key.clone()) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(height, error = %e, "Failed to encode block");
                    break;
                }
            };
            if let Err(e) = network.send_to_peer(layer, &request.sender, &msg).await {
                warn!(peer = %request.sender, height, error = %e, "Failed to send block");
                break;
            }
            metrics.blocks_served.inc();
        }
    });
}
