//! Block model shared by the beacon and shard chains
//!
//! Both block kinds carry the same header layout and the same multi-signature
//! fields. [`MultiSigned`] is the uniform view the consensus engine uses to
//! read the message-to-sign and to write the finalized signature, while
//! [`PendingBlock`] is the tagged candidate a round works on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chain::{Layer, ShardId};
use super::crypto::{Hash, PublicKey};
use crate::error::{CoreError, Result};

/// Header common to beacon and shard blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub round: u64,
    pub layer: Layer,
    pub prev_hash: Hash,
    pub producer: PublicKey,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub body_hash: Hash,
}

impl BlockHeader {
    /// Header hash, the message every committee member signs
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.round.to_le_bytes());
        match self.layer {
            Layer::Beacon => hasher.update(&[0xff]),
            Layer::Shard(id) => hasher.update(&[id]),
        };
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.producer.as_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(self.body_hash.as_bytes());
        Hash(*hasher.finalize().as_bytes())
    }
}

/// Multi-signature fields written once consensus completes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub r: String,
    pub aggregated_sig: String,
    /// `[validators_idx_r, validators_idx_agg_sig]` once finalized
    pub validators_index: Vec<Vec<usize>>,
}

impl BlockSignature {
    pub fn is_finalized(&self) -> bool {
        !self.aggregated_sig.is_empty() && self.validators_index.len() == 2
    }
}

/// Beacon block payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBody {
    /// Latest shard heights confirmed by this beacon block
    pub shard_heights: BTreeMap<ShardId, u64>,
    /// Committee instructions (assign, swap, stake)
    pub instructions: Vec<Vec<String>>,
    /// Shard-to-beacon pool height the proposing quorum agreed on
    #[serde(default)]
    pub pool_height: u64,
}

/// Shard block payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBody {
    pub transactions: Vec<Vec<u8>>,
    /// Shards receiving cross-shard outputs from this block
    pub cross_shard_targets: Vec<ShardId>,
    /// Cross-shard pool height the proposing quorum agreed on
    #[serde(default)]
    pub pool_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    pub header: BlockHeader,
    pub body: BeaconBody,
    pub signature: BlockSignature,
}

impl BeaconBlock {
    /// Build an unsigned beacon block on top of `prev_hash`
    pub fn new(height: u64, round: u64, prev_hash: Hash, producer: PublicKey, body: BeaconBody) -> Result<Self> {
        let body_hash = Hash::of(&serde_json::to_vec(&body)?);
        Ok(Self {
            header: BlockHeader {
                height,
                round,
                layer: Layer::Beacon,
                prev_hash,
                producer,
                timestamp: Utc::now().timestamp(),
                body_hash,
            },
            body,
            signature: BlockSignature::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBlock {
    pub header: BlockHeader,
    pub body: ShardBody,
    pub signature: BlockSignature,
}

impl ShardBlock {
    /// Build an unsigned shard block on top of `prev_hash`
    pub fn new(
        shard_id: ShardId,
        height: u64,
        round: u64,
        prev_hash: Hash,
        producer: PublicKey,
        body: ShardBody,
    ) -> Result<Self> {
        let body_hash = Hash::of(&serde_json::to_vec(&body)?);
        Ok(Self {
            header: BlockHeader {
                height,
                round,
                layer: Layer::Shard(shard_id),
                prev_hash,
                producer,
                timestamp: Utc::now().timestamp(),
                body_hash,
            },
            body,
            signature: BlockSignature::default(),
        })
    }

    pub fn shard_id(&self) -> Option<ShardId> {
        self.header.layer.shard_id()
    }
}

/// Uniform access to the signature fields of a block
pub trait MultiSigned {
    fn header(&self) -> &BlockHeader;

    fn signature(&self) -> &BlockSignature;

    fn signature_mut(&mut self) -> &mut BlockSignature;

    /// Message every committee member signs for this block
    fn message_hash(&self) -> Hash {
        self.header().hash()
    }

    /// Write the combined signature; index lists are copied, never aliased
    fn set_multi_signature(
        &mut self,
        r: &str,
        aggregated_sig: &str,
        validators_idx_r: &[usize],
        validators_idx_agg_sig: &[usize],
    ) {
        let signature = self.signature_mut();
        signature.r = r.to_string();
        signature.aggregated_sig = aggregated_sig.to_string();
        signature.validators_index = vec![validators_idx_r.to_vec(), validators_idx_agg_sig.to_vec()];
    }
}

impl MultiSigned for BeaconBlock {
    fn header(&self) -> &BlockHeader {
        &self.header
    }

    fn signature(&self) -> &BlockSignature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut BlockSignature {
        &mut self.signature
    }
}

impl MultiSigned for ShardBlock {
    fn header(&self) -> &BlockHeader {
        &self.header
    }

    fn signature(&self) -> &BlockSignature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut BlockSignature {
        &mut self.signature
    }
}

/// Candidate block of one BFT round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingBlock {
    Beacon(BeaconBlock),
    Shard(ShardBlock),
}

impl PendingBlock {
    pub fn layer(&self) -> Layer {
        self.header().layer
    }

    pub fn height(&self) -> u64 {
        self.header().height
    }

    /// Pool height recorded in the body
    pub fn pool_height(&self) -> u64 {
        match self {
            PendingBlock::Beacon(block) => block.body.pool_height,
            PendingBlock::Shard(block) => block.body.pool_height,
        }
    }

    /// JSON encoding of the layer-specific block
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            PendingBlock::Beacon(block) => serde_json::to_vec(block)?,
            PendingBlock::Shard(block) => serde_json::to_vec(block)?,
        };
        Ok(bytes)
    }

    /// Decode a block proposed for `layer`
    pub fn from_bytes(layer: Layer, bytes: &[u8]) -> Result<Self> {
        let block = match layer {
            Layer::Beacon => PendingBlock::Beacon(serde_json::from_slice(bytes)?),
            Layer::Shard(_) => PendingBlock::Shard(serde_json::from_slice(bytes)?),
        };
        if block.layer() != layer {
            return Err(CoreError::invalid(format!(
                "block built for {} proposed on {}",
                block.layer(),
                layer
            )));
        }
        Ok(block)
    }

    fn inner(&self) -> &dyn MultiSigned {
        match self {
            PendingBlock::Beacon(block) => block,
            PendingBlock::Shard(block) => block,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn MultiSigned {
        match self {
            PendingBlock::Beacon(block) => block,
            PendingBlock::Shard(block) => block,
        }
    }
}

impl MultiSigned for PendingBlock {
    fn header(&self) -> &BlockHeader {
        self.inner().header()
    }

    fn signature(&self) -> &BlockSignature {
        self.inner().signature()
    }

    fn signature_mut(&mut self) -> &mut BlockSignature {
        self.inner_mut().signature_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer() -> PublicKey {
        PublicKey::new(vec![7; 32])
    }

    #[test]
    fn test_header_hash_ignores_signature() {
        let mut block = BeaconBlock::new(1, 1, Hash::ZERO, producer(), BeaconBody::default()).unwrap();
        let before = block.message_hash();
        block.set_multi_signature("r", "agg", &[0, 1, 2], &[0, 1]);
        assert_eq!(before, block.message_hash());
    }

    #[test]
    fn test_header_hash_covers_round() {
        let a = ShardBlock::new(0, 5, 1, Hash::ZERO, producer(), ShardBody::default()).unwrap();
        let mut b = a.clone();
        b.header.round = 2;
        assert_ne!(a.message_hash(), b.message_hash());
    }

    #[test]
    fn test_set_multi_signature_copies_indexes() {
        let mut idx_r = vec![0, 2, 3];
        let idx_agg = vec![0, 3];
        let block = ShardBlock::new(1, 5, 1, Hash::ZERO, producer(), ShardBody::default()).unwrap();
        let mut pending = PendingBlock::Shard(block);

        pending.set_multi_signature("r-value", "agg-sig", &idx_r, &idx_agg);
        idx_r.push(9);

        let signature = pending.signature();
        assert_eq!(signature.r, "r-value");
        assert_eq!(signature.aggregated_sig, "agg-sig");
        assert_eq!(signature.validators_index, vec![vec![0, 2, 3], vec![0, 3]]);
        assert!(signature.is_finalized());
    }

    #[test]
    fn test_pending_block_bytes() {
        let block = ShardBlock::new(2, 9, 3, Hash::of(b"parent"), producer(), ShardBody::default()).unwrap();
        let pending = PendingBlock::Shard(block);
        let bytes = pending.to_bytes().unwrap();

        let decoded = PendingBlock::from_bytes(Layer::Shard(2), &bytes).unwrap();
        assert_eq!(decoded, pending);
        assert_eq!(decoded.height(), 9);
    }

    #[test]
    fn test_pending_block_rejects_wrong_layer() {
        let block = ShardBlock::new(2, 9, 3, Hash::ZERO, producer(), ShardBody::default()).unwrap();
        let bytes = PendingBlock::Shard(block).to_bytes().unwrap();

        assert!(PendingBlock::from_bytes(Layer::Shard(4), &bytes).is_err());
        assert!(PendingBlock::from_bytes(Layer::Beacon, &bytes).is_err());
    }
}
