//! Chain layer and committee role types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shard identifier
pub type ShardId = u8;

/// Chain layer a BFT round runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// The beacon chain
    Beacon,
    /// A shard chain
    Shard(ShardId),
}

impl Layer {
    /// Shard id, present only for shard rounds
    pub fn shard_id(&self) -> Option<ShardId> {
        match self {
            Layer::Beacon => None,
            Layer::Shard(id) => Some(*id),
        }
    }

    /// Check if this is the beacon layer
    pub fn is_beacon(&self) -> bool {
        matches!(self, Layer::Beacon)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Beacon => write!(f, "beacon"),
            Layer::Shard(id) => write!(f, "shard-{}", id),
        }
    }
}

/// Role of a key for a given layer and round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Leader of the round
    Proposer,
    /// Committee member that is not leading
    Validator,
    /// Waiting to join the committee
    Pending,
    /// Not part of the committee
    Observer,
}

impl Role {
    /// Whether this role takes part in the round
    pub fn is_committee(&self) -> bool {
        matches!(self, Role::Proposer | Role::Validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_shard_id() {
        assert_eq!(Layer::Beacon.shard_id(), None);
        assert_eq!(Layer::Shard(3).shard_id(), Some(3));
        assert!(Layer::Beacon.is_beacon());
        assert_eq!(Layer::Shard(3).to_string(), "shard-3");
    }

    #[test]
    fn test_role_membership() {
        assert!(Role::Proposer.is_committee());
        assert!(Role::Validator.is_committee());
        assert!(!Role::Pending.is_committee());
        assert!(!Role::Observer.is_committee());
    }
}
