//! Immutable per-round data

use shardbft_core::{Hash, Layer, PublicKey, ShardId};

use crate::error::{ConsensusError, Result};
use crate::message::MAX_COMMITTEE_SIZE;

/// Committee, round, layer, and expected state for one BFT round
///
/// Committee order is the signing order: validator index lists refer to
/// positions in this vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    committee: Vec<PublicKey>,
    round: u64,
    layer: Layer,
    best_state_hash: Hash,
}

impl RoundContext {
    pub fn new(committee: Vec<PublicKey>, round: u64, layer: Layer, best_state_hash: Hash) -> Result<Self> {
        if committee.is_empty() {
            return Err(ConsensusError::Configuration("empty committee".to_string()));
        }
        if committee.len() > MAX_COMMITTEE_SIZE {
            return Err(ConsensusError::Configuration(format!(
                "committee of {} exceeds {} members",
                committee.len(),
                MAX_COMMITTEE_SIZE
            )));
        }
        for (idx, key) in committee.iter().enumerate() {
            if committee[..idx].contains(key) {
                return Err(ConsensusError::Configuration(format!(
                    "duplicate committee member {}",
                    key
                )));
            }
        }
        Ok(Self {
            committee,
            round,
            layer,
            best_state_hash,
        })
    }

    pub fn committee(&self) -> &[PublicKey] {
        &self.committee
    }

    /// N
    pub fn size(&self) -> usize {
        self.committee.len()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn shard_id(&self) -> Option<ShardId> {
        self.layer.shard_id()
    }

    pub fn best_state_hash(&self) -> &Hash {
        &self.best_state_hash
    }

    pub fn is_member(&self, key: &PublicKey) -> bool {
        self.committee.contains(key)
    }

    /// Signing index of `key`
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.committee.iter().position(|k| k == key)
    }

    /// Round and best-state hash both match this round
    pub fn matches(&self, round: u64, best_state_hash: &Hash) -> bool {
        self.round == round && &self.best_state_hash == best_state_hash
    }
}
