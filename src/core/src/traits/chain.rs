//! Chain collaborator trait

use crate::error::Result;
use crate::types::{BeaconBlock, Hash, Layer, PendingBlock, PublicKey, Role, ShardBlock, ShardId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Block creation, verification, and chain state lookups
#[async_trait]
pub trait ChainCollaborator: Send + Sync {
    /// Build a candidate block for the given round, including pool
    /// content up to `pool_height`
    async fn create_candidate_block(&self, layer: Layer, round: u64, pool_height: u64) -> Result<PendingBlock>;

    /// Verify a proposed beacon block before signing it
    async fn verify_pre_sign_beacon_block(&self, block: &BeaconBlock) -> Result<()>;

    /// Verify a proposed shard block before signing it
    async fn verify_pre_sign_shard_block(&self, block: &ShardBlock, shard_id: ShardId) -> Result<()>;

    /// Role of `pubkey` on `layer` for `round`
    async fn get_pubkey_role(&self, pubkey: &PublicKey, layer: Layer, round: u64) -> Result<Role>;

    /// Highest pending pool height this node has validated. Sent in Ready;
    /// the leader builds on the lowest height its quorum reported.
    async fn latest_valid_pending_height(&self, layer: Layer) -> Result<u64>;

    /// Ordered committee for the next block on `layer`
    async fn committee(&self, layer: Layer) -> Result<Vec<PublicKey>>;

    /// Hash of the current best state on `layer`
    async fn best_state_hash(&self, layer: Layer) -> Result<Hash>;

    /// Height of the best block on `layer`
    async fn best_height(&self, layer: Layer) -> Result<u64>;

    /// Timestamp of the best block on `layer`
    async fn last_block_time(&self, layer: Layer) -> Result<DateTime<Utc>>;

    /// Finalized block at `height`, if this node has it
    async fn get_block(&self, layer: Layer, height: u64) -> Result<Option<PendingBlock>>;

    /// Append a finalized block
    async fn insert_block(&self, block: PendingBlock) -> Result<()>;
}
