//! Single-layer chain for in-process networks

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use shardbft_core::{
    BeaconBlock, BeaconBody, ChainCollaborator, CoreError, Hash, Layer, MultiSigned, PendingBlock,
    PublicKey, Result, Role, ShardBlock, ShardBody, ShardId,
};
use tracing::{debug, info};

use crate::quorum::commit_threshold;

struct ChainState {
    blocks: Vec<PendingBlock>,
    best_hash: Hash,
    last_block_time: DateTime<Utc>,
}

/// One node's copy of a single beacon or shard chain.
///
/// The proposer of height `h`, round `r` is `committee[(h + r - 1) % N]`,
/// so a failed round hands the next attempt to the following member.
pub struct DevChain {
    own_key: PublicKey,
    layer: Layer,
    committee: Vec<PublicKey>,
    state: RwLock<ChainState>,
    creation_delay: Duration,
    fail_creation: AtomicBool,
    /// Highest cross-layer pool height this node has validated
    pending_height: AtomicU64,
}

impl DevChain {
    pub fn new(own_key: PublicKey, layer: Layer, committee: Vec<PublicKey>) -> Self {
        let genesis = Hash::of(format!("genesis/{}", layer).as_bytes());
        Self {
            own_key,
            layer,
            committee,
            state: RwLock::new(ChainState {
                blocks: Vec::new(),
                best_hash: genesis,
                last_block_time: Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now),
            }),
            creation_delay: Duration::ZERO,
            fail_creation: AtomicBool::new(false),
            pending_height: AtomicU64::new(0),
        }
    }

    /// Delay every candidate block by `delay`
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = delay;
        self
    }

    /// Make candidate block creation fail
    pub fn fail_block_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Set the pool height reported in Ready and used to bound proposals
    pub fn set_pending_height(&self, height: u64) {
        self.pending_height.store(height, Ordering::SeqCst);
    }

    pub fn pending_height(&self) -> u64 {
        self.pending_height.load(Ordering::SeqCst)
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn height(&self) -> u64 {
        self.state.read().blocks.len() as u64
    }

    pub fn best_hash(&self) -> Hash {
        self.state.read().best_hash
    }

    /// Finalized blocks, oldest first
    pub fn blocks(&self) -> Vec<PendingBlock> {
        self.state.read().blocks.clone()
    }

    /// Proposer of `height` in `round`
    pub fn proposer_for(&self, height: u64, round: u64) -> &PublicKey {
        let n = self.committee.len() as u64;
        let idx = (height + round.saturating_sub(1)) % n;
        &self.committee[idx as usize]
    }

    fn check_layer(&self, layer: Layer) -> Result<()> {
        if layer != self.layer {
            return Err(CoreError::not_found(format!("this node only follows {}", self.layer)));
        }
        Ok(())
    }

    fn check_candidate(&self, block: &dyn MultiSigned, body_hash: Hash, pool_height: u64) -> Result<()> {
        let header = block.header();
        let state = self.state.read();
        let next = state.blocks.len() as u64 + 1;

        if header.layer != self.layer {
            return Err(CoreError::invalid(format!("block for {} on {}", header.layer, self.layer)));
        }
        if header.height != next {
            return Err(CoreError::invalid(format!("height {}, expected {}", header.height, next)));
        }
        if header.prev_hash != state.best_hash {
            return Err(CoreError::invalid("block does not extend the best block"));
        }
        if &header.producer != self.proposer_for(next, header.round) {
            return Err(CoreError::invalid(format!(
                "{} is not the proposer of round {}",
                header.producer, header.round
            )));
        }
        if header.body_hash != body_hash {
            return Err(CoreError::invalid("body hash mismatch"));
        }
        if pool_height > self.pending_height() {
            return Err(CoreError::invalid(format!(
                "pool height {} is ahead of {}",
                pool_height,
                self.pending_height()
            )));
        }
        Ok(())
    }

    /// Signer set of a finalized block must be a commit quorum of this committee
    fn check_signers(&self, block: &PendingBlock) -> Result<()> {
        let signature = block.signature();
        let signers = &signature.validators_index[1];
        let n = self.committee.len();
        if signers.iter().any(|&idx| idx >= n) {
            return Err(CoreError::invalid("signer index outside the committee"));
        }
        let mut distinct = signers.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() <= commit_threshold(n) {
            return Err(CoreError::invalid(format!(
                "{} signers, more than {} required",
                distinct.len(),
                commit_threshold(n)
            )));
        }
        Ok(())
    }
}

fn body_hash<T: serde::Serialize>(body: &T) -> Result<Hash> {
    Ok(Hash::of(&serde_json::to_vec(body)?))
}

#[async_trait]
impl ChainCollaborator for DevChain {
    async fn create_candidate_block(&self, layer: Layer, round: u64, pool_height: u64) -> Result<PendingBlock> {
        self.check_layer(layer)?;
        if !self.creation_delay.is_zero() {
            tokio::time::sleep(self.creation_delay).await;
        }
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(CoreError::chain("block creation disabled"));
        }

        let (height, prev_hash) = {
            let state = self.state.read();
            (state.blocks.len() as u64 + 1, state.best_hash)
        };
        let block = match layer {
            Layer::Beacon => PendingBlock::Beacon(BeaconBlock::new(
                height,
                round,
                prev_hash,
                self.own_key.clone(),
                BeaconBody {
                    pool_height,
                    ..BeaconBody::default()
                },
            )?),
            Layer::Shard(shard_id) => {
                let body = ShardBody {
                    transactions: vec![format!("tx/{}/{}/{}", shard_id, height, round).into_bytes()],
                    cross_shard_targets: Vec::new(),
                    pool_height,
                };
                PendingBlock::Shard(ShardBlock::new(
                    shard_id,
                    height,
                    round,
                    prev_hash,
                    self.own_key.clone(),
                    body,
                )?)
            }
        };
        debug!(%layer, height, round, pool_height, "Created candidate block");
        Ok(block)
    }

    async fn verify_pre_sign_beacon_block(&self, block: &BeaconBlock) -> Result<()> {
        self.check_candidate(block, body_hash(&block.body)?, block.body.pool_height)
    }

    async fn verify_pre_sign_shard_block(&self, block: &ShardBlock, shard_id: ShardId) -> Result<()> {
        if block.shard_id() != Some(shard_id) {
            return Err(CoreError::invalid(format!("block is not for shard {}", shard_id)));
        }
        self.check_candidate(block, body_hash(&block.body)?, block.body.pool_height)
    }

    async fn get_pubkey_role(&self, pubkey: &PublicKey, layer: Layer, round: u64) -> Result<Role> {
        self.check_layer(layer)?;
        let next = self.height() + 1;
        if self.proposer_for(next, round) == pubkey {
            Ok(Role::Proposer)
        } else if self.committee.contains(pubkey) {
            Ok(Role::Validator)
        } else {
            Ok(Role::Observer)
        }
    }

    async fn latest_valid_pending_height(&self, layer: Layer) -> Result<u64> {
        self.check_layer(layer)?;
        Ok(self.pending_height())
    }

    async fn committee(&self, layer: Layer) -> Result<Vec<PublicKey>> {
        self.check_layer(layer)?;
        Ok(self.committee.clone())
    }

    async fn best_state_hash(&self, layer: Layer) -> Result<Hash> {
        self.check_layer(layer)?;
        Ok(self.best_hash())
    }

    async fn best_height(&self, layer: Layer) -> Result<u64> {
        self.check_layer(layer)?;
        Ok(self.height())
    }

    async fn last_block_time(&self, layer: Layer) -> Result<DateTime<Utc>> {
        self.check_layer(layer)?;
        Ok(self.state.read().last_block_time)
    }

    async fn get_block(&self, layer: Layer, height: u64) -> Result<Option<PendingBlock>> {
        self.check_layer(layer)?;
        let state = self.state.read();
        Ok(height
            .checked_sub(1)
            .and_then(|idx| state.blocks.get(idx as usize))
            .cloned())
    }

    async fn insert_block(&self, block: PendingBlock) -> Result<()> {
        if !block.signature().is_finalized() {
            return Err(CoreError::invalid("block is not multi-signed"));
        }
        let header = block.header().clone();
        if header.layer != self.layer {
            return Err(CoreError::invalid(format!("block for {} on {}", header.layer, self.layer)));
        }
        self.check_signers(&block)?;
        if &header.producer != self.proposer_for(header.height, header.round) {
            return Err(CoreError::invalid(format!(
                "{} did not propose height {} in round {}",
                header.producer, header.height, header.round
            )));
        }

        let mut state = self.state.write();
        let next = state.blocks.len() as u64 + 1;
        if header.height != next || header.prev_hash != state.best_hash {
            return Err(CoreError::chain(format!(
                "block {} does not extend height {}",
                header.height,
                next - 1
            )));
        }

        state.best_hash = block.message_hash();
        state.last_block_time = Utc
            .timestamp_opt(header.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        state.blocks.push(block);
        info!(layer = %self.layer, height = header.height, hash = %state.best_hash, "Inserted block");
        Ok(())
    }
}
