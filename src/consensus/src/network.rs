//! Network collaborator trait

use std::collections::HashSet;

use async_trait::async_trait;
use shardbft_core::{Layer, PublicKey, Result, ShardId};

use crate::message::BftMessage;

/// Best-effort gossip to the beacon or a shard committee
#[async_trait]
pub trait NetworkCollaborator: Send + Sync {
    /// Send to every beacon peer not in `exclude`
    async fn push_to_beacon(&self, msg: &BftMessage, exclude: &HashSet<PublicKey>) -> Result<()>;

    /// Send to every peer of `shard_id` not in `exclude`
    async fn push_to_shard(&self, msg: &BftMessage, shard_id: ShardId, exclude: &HashSet<PublicKey>) -> Result<()>;

    /// Send to a single peer of `layer`
    async fn send_to_peer(&self, layer: Layer, peer: &PublicKey, msg: &BftMessage) -> Result<()>;

    /// Dispatch to the network of `layer`
    async fn push(&self, layer: Layer, msg: &BftMessage, exclude: &HashSet<PublicKey>) -> Result<()> {
        match layer {
            Layer::Beacon => self.push_to_beacon(msg, exclude).await,
            Layer::Shard(shard_id) => self.push_to_shard(msg, shard_id, exclude).await,
        }
    }
}
