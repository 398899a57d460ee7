//! # ShardBFT Core
//!
//! Shared chain types, traits, and error handling for the ShardBFT node.
//! The consensus engine and the node binary both build on these types so
//! that block, key, and layer representations stay identical across crates.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use traits::{ChainCollaborator, SignatureCoordinator};
pub use types::{
    BeaconBlock, BeaconBody, BlockHeader, BlockSignature, CombinedSignature, CommitShare,
    CommitSig, Hash, Layer, MultiSigned, PendingBlock, PublicKey, Role, ShardBlock, ShardBody,
    ShardId,
};

/// Block height on a chain layer
pub type BlockHeight = u64;

/// BFT round number within one height, starting at 1
pub type RoundNumber = u64;
