//! Shared types for the ShardBFT node

pub mod block;
pub mod chain;
pub mod crypto;
pub mod multisig;

// Re-export commonly used types
pub use block::{
    BeaconBlock, BeaconBody, BlockHeader, BlockSignature, MultiSigned, PendingBlock, ShardBlock,
    ShardBody,
};
pub use chain::{Layer, Role, ShardId};
pub use crypto::{Hash, PublicKey};
pub use multisig::{CombinedSignature, CommitShare, CommitSig};
