//! BFT protocol messages
//!
//! Every message carries the round number, the best-state hash the sender
//! built its view on, and the sender's public key. Those three fields are
//! what the router checks before a message may count toward any quorum.
//! Block announcements and block requests are chain sync traffic and are
//! exempt from the round checks.

use serde::{Deserialize, Serialize};
use shardbft_core::{Hash, PublicKey};

use crate::error::{ConsensusError, Result};

/// Command identifier of each message kind on the wire
pub const CMD_BFT_PROPOSE: &str = "bftpropose";
pub const CMD_BFT_READY: &str = "bftready";
pub const CMD_BFT_REQ: &str = "bftreq";
pub const CMD_BFT_AGREE: &str = "bftagree";
pub const CMD_BFT_COMMIT: &str = "bftcommit";
pub const CMD_BLOCK: &str = "block";
pub const CMD_GET_BLOCKS: &str = "getblocks";

/// Largest committee whose index lists fit in a Commit frame
pub const MAX_COMMITTEE_SIZE: usize = 1024;

/// Encoded size of one validator index
const INDEX_WIRE_LEN: usize = 8;

/// Maximum encoded size per message kind
pub const MAX_BFT_PROPOSE_PAYLOAD: usize = 4 * 1024 * 1024;
pub const MAX_BFT_READY_PAYLOAD: usize = 1000;
pub const MAX_BFT_REQ_PAYLOAD: usize = 1000;
pub const MAX_BFT_AGREE_PAYLOAD: usize = 2000;
pub const MAX_BFT_COMMIT_PAYLOAD: usize = 2000 + INDEX_WIRE_LEN * MAX_COMMITTEE_SIZE;
pub const MAX_BLOCK_PAYLOAD: usize = MAX_BFT_PROPOSE_PAYLOAD;
pub const MAX_GET_BLOCKS_PAYLOAD: usize = 1000;

/// Message kind, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Propose,
    Ready,
    Req,
    Agree,
    Commit,
    Block,
    GetBlocks,
}

impl MessageKind {
    pub fn command(&self) -> &'static str {
        match self {
            MessageKind::Propose => CMD_BFT_PROPOSE,
            MessageKind::Ready => CMD_BFT_READY,
            MessageKind::Req => CMD_BFT_REQ,
            MessageKind::Agree => CMD_BFT_AGREE,
            MessageKind::Commit => CMD_BFT_COMMIT,
            MessageKind::Block => CMD_BLOCK,
            MessageKind::GetBlocks => CMD_GET_BLOCKS,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        match self {
            MessageKind::Propose => MAX_BFT_PROPOSE_PAYLOAD,
            MessageKind::Ready => MAX_BFT_READY_PAYLOAD,
            MessageKind::Req => MAX_BFT_REQ_PAYLOAD,
            MessageKind::Agree => MAX_BFT_AGREE_PAYLOAD,
            MessageKind::Commit => MAX_BFT_COMMIT_PAYLOAD,
            MessageKind::Block => MAX_BLOCK_PAYLOAD,
            MessageKind::GetBlocks => MAX_GET_BLOCKS_PAYLOAD,
        }
    }

    /// Chain sync traffic rather than a phase message
    pub fn is_sync(&self) -> bool {
        matches!(self, MessageKind::Block | MessageKind::GetBlocks)
    }
}

/// Main BFT message enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BftMessage {
    Propose(Propose),
    Ready(Ready),
    Req(Req),
    Agree(Agree),
    Commit(Commit),
    Block(BlockAnnounce),
    GetBlocks(GetBlocks),
}

/// Leader's candidate block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub round: u64,
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    /// JSON-encoded layer-specific block
    pub block: Vec<u8>,
    pub timestamp: i64,
}

impl Propose {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey, block: Vec<u8>) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            block,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Validator is listening for this round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub round: u64,
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub latest_valid_height: u64,
    pub timestamp: i64,
}

impl Ready {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey, latest_valid_height: u64) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            latest_valid_height,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Leader asks validators to re-send Ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Req {
    pub round: u64,
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub timestamp: i64,
}

impl Req {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Personal commitment Ri over the block hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agree {
    pub round: u64,
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub ri: Vec<u8>,
    pub blk_hash: Hash,
    pub timestamp: i64,
}

impl Agree {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey, ri: Vec<u8>, blk_hash: Hash) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            ri,
            blk_hash,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Partial signature produced under R
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub round: u64,
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub commit_sig: String,
    pub r: String,
    pub validators_idx: Vec<usize>,
    pub timestamp: i64,
}

impl Commit {
    pub fn new(
        round: u64,
        best_state_hash: Hash,
        sender: PublicKey,
        commit_sig: String,
        r: String,
        validators_idx: Vec<usize>,
    ) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            commit_sig,
            r,
            validators_idx,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Finalized, multi-signed block, announced after insertion or sent in
/// answer to [`GetBlocks`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnounce {
    /// Round the block was finalized in
    pub round: u64,
    /// Best-state hash the block extends
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub height: u64,
    /// JSON-encoded layer-specific block
    pub block: Vec<u8>,
    pub timestamp: i64,
}

impl BlockAnnounce {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey, height: u64, block: Vec<u8>) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            height,
            block,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Request for finalized blocks from `from_height` on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocks {
    pub round: u64,
    /// Requester's best-state hash
    pub best_state_hash: Hash,
    pub sender: PublicKey,
    pub from_height: u64,
    pub timestamp: i64,
}

impl GetBlocks {
    pub fn new(round: u64, best_state_hash: Hash, sender: PublicKey, from_height: u64) -> Self {
        Self {
            round,
            best_state_hash,
            sender,
            from_height,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl BftMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BftMessage::Propose(_) => MessageKind::Propose,
            BftMessage::Ready(_) => MessageKind::Ready,
            BftMessage::Req(_) => MessageKind::Req,
            BftMessage::Agree(_) => MessageKind::Agree,
            BftMessage::Commit(_) => MessageKind::Commit,
            BftMessage::Block(_) => MessageKind::Block,
            BftMessage::GetBlocks(_) => MessageKind::GetBlocks,
        }
    }

    pub fn command(&self) -> &'static str {
        self.kind().command()
    }

    pub fn round(&self) -> u64 {
        match self {
            BftMessage::Propose(m) => m.round,
            BftMessage::Ready(m) => m.round,
            BftMessage::Req(m) => m.round,
            BftMessage::Agree(m) => m.round,
            BftMessage::Commit(m) => m.round,
            BftMessage::Block(m) => m.round,
            BftMessage::GetBlocks(m) => m.round,
        }
    }

    pub fn best_state_hash(&self) -> &Hash {
        match self {
            BftMessage::Propose(m) => &m.best_state_hash,
            BftMessage::Ready(m) => &m.best_state_hash,
            BftMessage::Req(m) => &m.best_state_hash,
            BftMessage::Agree(m) => &m.best_state_hash,
            BftMessage::Commit(m) => &m.best_state_hash,
            BftMessage::Block(m) => &m.best_state_hash,
            BftMessage::GetBlocks(m) => &m.best_state_hash,
        }
    }

    pub fn sender(&self) -> &PublicKey {
        match self {
            BftMessage::Propose(m) => &m.sender,
            BftMessage::Ready(m) => &m.sender,
            BftMessage::Req(m) => &m.sender,
            BftMessage::Agree(m) => &m.sender,
            BftMessage::Commit(m) => &m.sender,
            BftMessage::Block(m) => &m.sender,
            BftMessage::GetBlocks(m) => &m.sender,
        }
    }

    /// Encode for the wire, enforcing the per-command size limit
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        self.check_size(bytes.len())?;
        Ok(bytes)
    }

    /// Decode a wire frame, rejecting frames over the per-command limit
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_BFT_PROPOSE_PAYLOAD {
            return Err(ConsensusError::MessageTooLarge {
                command: "bft",
                size: bytes.len(),
                max: MAX_BFT_PROPOSE_PAYLOAD,
            });
        }
        let msg: BftMessage = bincode::deserialize(bytes)?;
        msg.check_size(bytes.len())?;
        Ok(msg)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let kind = self.kind();
        if size > kind.max_payload_len() {
            return Err(ConsensusError::MessageTooLarge {
                command: kind.command(),
                size,
                max: kind.max_payload_len(),
            });
        }
        Ok(())
    }
}

impl From<Propose> for BftMessage {
    fn from(msg: Propose) -> Self {
        BftMessage::Propose(msg)
    }
}

impl From<Ready> for BftMessage {
    fn from(msg: Ready) -> Self {
        BftMessage::Ready(msg)
    }
}

impl From<Req> for BftMessage {
    fn from(msg: Req) -> Self {
        BftMessage::Req(msg)
    }
}

impl From<Agree> for BftMessage {
    fn from(msg: Agree) -> Self {
        BftMessage::Agree(msg)
    }
}

impl From<Commit> for BftMessage {
    fn from(msg: Commit) -> Self {
        BftMessage::Commit(msg)
    }
}

impl From<BlockAnnounce> for BftMessage {
    fn from(msg: BlockAnnounce) -> Self {
        BftMessage::Block(msg)
    }
}

impl From<GetBlocks> for BftMessage {
    fn from(msg: GetBlocks) -> Self {
        BftMessage::GetBlocks(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PublicKey {
        PublicKey::new(vec![3; 32])
    }

    #[test]
    fn test_accessors() {
        let msg: BftMessage = Agree::new(4, Hash::of(b"state"), sender(), vec![1, 2], Hash::of(b"blk")).into();
        assert_eq!(msg.kind(), MessageKind::Agree);
        assert_eq!(msg.command(), "bftagree");
        assert_eq!(msg.round(), 4);
        assert_eq!(msg.best_state_hash(), &Hash::of(b"state"));
        assert_eq!(msg.sender(), &sender());
    }

    #[test]
    fn test_wire_encoding() {
        let msg: BftMessage = Commit::new(2, Hash::ZERO, sender(), "sig".into(), "r".into(), vec![0, 1, 3]).into();
        let bytes = msg.encode().unwrap();
        assert_eq!(BftMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_oversized_ready_rejected() {
        // Ready has no variable payload, so an inflated sender key is the only way past the limit
        let msg: BftMessage = Ready::new(1, Hash::ZERO, PublicKey::new(vec![0; 2000]), 10).into();
        let err = msg.encode().unwrap_err();
        assert!(matches!(err, ConsensusError::MessageTooLarge { command: "bftready", .. }));

        let raw = bincode::serialize(&msg).unwrap();
        assert!(BftMessage::decode(&raw).is_err());
    }

    #[test]
    fn test_large_propose_accepted() {
        let msg: BftMessage = Propose::new(1, Hash::ZERO, sender(), vec![7; 64 * 1024]).into();
        let bytes = msg.encode().unwrap();
        assert_eq!(BftMessage::decode(&bytes).unwrap().kind(), MessageKind::Propose);
    }

    fn full_commit(indexes: usize) -> BftMessage {
        let sig = "ab".repeat(32);
        let r = "cd".repeat(32);
        Commit::new(9, Hash::of(b"state"), sender(), sig, r, (0..indexes).collect()).into()
    }

    #[test]
    fn test_commit_fits_largest_committee() {
        let msg = full_commit(MAX_COMMITTEE_SIZE);
        let bytes = msg.encode().unwrap();
        assert!(bytes.len() <= MAX_BFT_COMMIT_PAYLOAD);
        assert_eq!(BftMessage::decode(&bytes).unwrap(), msg);

        for n in [219, 220, 256] {
            assert!(full_commit(n).encode().is_ok(), "N = {}", n);
        }
    }

    #[test]
    fn test_commit_limit_still_enforced() {
        let err = full_commit(MAX_BFT_COMMIT_PAYLOAD / INDEX_WIRE_LEN).encode().unwrap_err();
        assert!(matches!(err, ConsensusError::MessageTooLarge { command: "bftcommit", .. }));
    }

    #[test]
    fn test_sync_messages() {
        let block: BftMessage = BlockAnnounce::new(3, Hash::of(b"parent"), sender(), 7, vec![1; 512]).into();
        assert_eq!(block.kind(), MessageKind::Block);
        assert!(block.kind().is_sync());
        assert_eq!(block.best_state_hash(), &Hash::of(b"parent"));
        assert_eq!(BftMessage::decode(&block.encode().unwrap()).unwrap(), block);

        let request: BftMessage = GetBlocks::new(2, Hash::ZERO, sender(), 5).into();
        assert_eq!(request.command(), "getblocks");
        assert!(request.kind().is_sync());
        assert!(!MessageKind::Commit.is_sync());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(BftMessage::decode(&[0xff, 0xff, 0xff, 0xff, 1, 2]).is_err());
    }
}
