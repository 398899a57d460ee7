//! Error types for consensus operations

use shardbft_core::CoreError;
use thiserror::Error;

use crate::Phase;

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    // Round-fatal: quorum not reached before the phase deadline
    #[error("Didn't received enough ready msg")]
    ReadyQuorumTimeout,

    #[error("Failed to propose block")]
    ProposeFailed,

    #[error("Listen phase timeout")]
    ListenTimeout,

    #[error("Didn't receive enough Ri to continue")]
    NotEnoughRi,

    #[error("Not enough sigs to combine")]
    NotEnoughSigs,

    // Round-fatal: a peer announced a block past this node's next height
    #[error("Fell behind: peer announced height {height}")]
    FallenBehind { height: u64 },

    // Round-fatal: signature primitive failures
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Signature combination error: {0}")]
    Combination(String),

    // Message-level: the message is dropped and the phase keeps waiting
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid commit signature from {sender}: {reason}")]
    InvalidCommitSig { sender: String, reason: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message too large: {size} bytes exceeds {max} for {command}")]
    MessageTooLarge {
        command: &'static str,
        size: usize,
        max: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Prometheus metrics error
    #[error("Prometheus metric error: {0}")]
    Metrics(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConsensusError {
    /// Errors that end the round; everything else only drops a message
    pub fn is_round_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::ReadyQuorumTimeout
                | ConsensusError::ProposeFailed
                | ConsensusError::ListenTimeout
                | ConsensusError::NotEnoughRi
                | ConsensusError::NotEnoughSigs
                | ConsensusError::FallenBehind { .. }
                | ConsensusError::Signing(_)
                | ConsensusError::Combination(_)
        )
    }

    /// Phase a round-fatal error is attributed to
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            ConsensusError::ReadyQuorumTimeout | ConsensusError::ProposeFailed => Some(Phase::Propose),
            ConsensusError::ListenTimeout => Some(Phase::Listen),
            ConsensusError::NotEnoughRi | ConsensusError::Signing(_) => Some(Phase::Agree),
            ConsensusError::NotEnoughSigs | ConsensusError::Combination(_) => Some(Phase::Commit),
            _ => None,
        }
    }
}

impl From<CoreError> for ConsensusError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Network(msg) => ConsensusError::Network(msg),
            CoreError::Chain(msg) => ConsensusError::Chain(msg),
            CoreError::Serialization(msg) => ConsensusError::Serialization(msg),
            other => ConsensusError::Internal(other.to_string()),
        }
    }
}

impl From<bincode::Error> for ConsensusError {
    fn from(e: bincode::Error) -> Self {
        ConsensusError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ConsensusError {
    fn from(e: serde_json::Error) -> Self {
        ConsensusError::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for ConsensusError {
    fn from(e: prometheus::Error) -> Self {
        ConsensusError::Metrics(e.to_string())
    }
}
