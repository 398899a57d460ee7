//! Inbound message classification and buffering
//!
//! [`MessageRouter`] decides, for the active phase, whether a message is
//! consumed now, held for a later phase, or dropped. [`Mailbox`] is the
//! single owner of the inbound channel and of the early-message buffer, so
//! deferred messages are never written from a detached task.
//!
//! Block announcements and block requests belong to chain sync rather than
//! to a round, so they skip the round and best-state checks.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;

use crate::context::RoundContext;
use crate::message::{BftMessage, BlockAnnounce, MessageKind};
use crate::state::Phase;

/// Why a message was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    WrongRound,
    WrongState,
    NotMember,
    /// Valid, but no remaining phase of this round consumes it
    Irrelevant,
}

impl DropReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::WrongRound => "wrong_round",
            DropReason::WrongState => "wrong_state",
            DropReason::NotMember => "not_member",
            DropReason::Irrelevant => "irrelevant",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Handle in the active phase
    Accept,
    /// Keep for the next phase
    Defer,
    /// Chain sync traffic, handled outside the phase logic
    Sync,
    Drop(DropReason),
}

/// Announced blocks kept for catch-up between rounds
pub const MAX_STASHED_BLOCKS: usize = 256;

/// Stateless classifier of inbound messages
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRouter;

impl MessageRouter {
    /// Round, best-state, and membership checks shared by every phase
    pub fn validate(msg: &BftMessage, ctx: &RoundContext) -> Result<(), DropReason> {
        if msg.round() != ctx.round() {
            return Err(DropReason::WrongRound);
        }
        if msg.best_state_hash() != ctx.best_state_hash() {
            return Err(DropReason::WrongState);
        }
        if !ctx.is_member(msg.sender()) {
            return Err(DropReason::NotMember);
        }
        Ok(())
    }

    pub fn route(phase: Phase, msg: &BftMessage, ctx: &RoundContext) -> Route {
        if msg.kind().is_sync() {
            if !ctx.is_member(msg.sender()) {
                return Route::Drop(DropReason::NotMember);
            }
            return Route::Sync;
        }
        if let Err(reason) = Self::validate(msg, ctx) {
            return Route::Drop(reason);
        }

        match (phase, msg.kind()) {
            (Phase::Propose, MessageKind::Ready) => Route::Accept,
            (Phase::Propose, MessageKind::Agree | MessageKind::Commit) => Route::Defer,

            (Phase::Listen, MessageKind::Propose | MessageKind::Req) => Route::Accept,
            (Phase::Listen, MessageKind::Agree | MessageKind::Commit) => Route::Defer,

            (Phase::Agree, MessageKind::Agree) => Route::Accept,
            (Phase::Agree, MessageKind::Commit) => Route::Defer,

            (Phase::Commit, MessageKind::Commit) => Route::Accept,

            _ => Route::Drop(DropReason::Irrelevant),
        }
    }
}

/// Inbound protocol messages plus the early-message buffer
pub struct Mailbox {
    inbox: mpsc::UnboundedReceiver<BftMessage>,
    /// Messages deferred by an earlier phase, replayed first
    replay: VecDeque<BftMessage>,
    /// Messages deferred by the active phase
    deferred: Vec<BftMessage>,
    /// Announced blocks, kept across rounds until the driver takes them
    sync: Vec<BlockAnnounce>,
    closed: bool,
}

impl Mailbox {
    pub fn new(inbox: mpsc::UnboundedReceiver<BftMessage>) -> Self {
        Self {
            inbox,
            replay: VecDeque::new(),
            deferred: Vec::new(),
            sync: Vec::new(),
            closed: false,
        }
    }

    /// Create a mailbox and the sender that feeds it
    pub fn channel() -> (mpsc::UnboundedSender<BftMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Hold a message for the next phase
    pub fn defer(&mut self, msg: BftMessage) {
        self.deferred.push(msg);
    }

    /// Make messages deferred so far visible to the phase being entered
    pub fn enter_phase(&mut self) {
        self.replay.extend(self.deferred.drain(..));
    }

    /// Forget everything buffered for the previous round
    pub fn begin_round(&mut self) {
        self.replay.clear();
        self.deferred.clear();
    }

    /// Keep an announced block for the driver. Returns false when the stash is full.
    pub fn stash_block(&mut self, block: BlockAnnounce) -> bool {
        if self.sync.len() >= MAX_STASHED_BLOCKS {
            return false;
        }
        self.sync.push(block);
        true
    }

    /// Announced blocks received so far
    pub fn take_blocks(&mut self) -> Vec<BlockAnnounce> {
        std::mem::take(&mut self.sync)
    }

    pub fn stashed_blocks(&self) -> usize {
        self.sync.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed && self.replay.is_empty()
    }

    /// Next message: replayed ones first, then the network.
    /// Returns `None` once the inbox is closed and nothing is left to replay.
    pub async fn next(&mut self) -> Option<BftMessage> {
        if let Some(msg) = self.replay.pop_front() {
            return Some(msg);
        }
        if self.closed {
            return None;
        }
        match self.inbox.recv().await {
            Some(msg) => Some(msg),
            None => {
                self.closed = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Agree, Commit, GetBlocks, Propose, Ready, Req};
    use shardbft_core::{Hash, Layer, PublicKey};

    fn key(i: u8) -> PublicKey {
        PublicKey::new(vec![i; 32])
    }

    fn ctx() -> RoundContext {
        RoundContext::new((0..4).map(key).collect(), 2, Layer::Beacon, Hash::of(b"best")).unwrap()
    }

    fn ready(round: u64, state: Hash, sender: PublicKey) -> BftMessage {
        Ready::new(round, state, sender, 0).into()
    }

    #[test]
    fn test_validation_drops() {
        let ctx = ctx();
        let best = Hash::of(b"best");
        assert_eq!(
            MessageRouter::route(Phase::Propose, &ready(1, best, key(1)), &ctx),
            Route::Drop(DropReason::WrongRound)
        );
        assert_eq!(
            MessageRouter::route(Phase::Propose, &ready(2, Hash::ZERO, key(1)), &ctx),
            Route::Drop(DropReason::WrongState)
        );
        assert_eq!(
            MessageRouter::route(Phase::Propose, &ready(2, best, key(9)), &ctx),
            Route::Drop(DropReason::NotMember)
        );
        assert_eq!(MessageRouter::route(Phase::Propose, &ready(2, best, key(1)), &ctx), Route::Accept);
    }

    #[test]
    fn test_phase_relevance() {
        let ctx = ctx();
        let best = Hash::of(b"best");
        let propose: BftMessage = Propose::new(2, best, key(0), vec![]).into();
        let req: BftMessage = Req::new(2, best, key(0)).into();
        let agree: BftMessage = Agree::new(2, best, key(1), vec![1], Hash::ZERO).into();
        let commit: BftMessage = Commit::new(2, best, key(1), "s".into(), "r".into(), vec![]).into();
        let ready = ready(2, best, key(1));

        assert_eq!(MessageRouter::route(Phase::Listen, &propose, &ctx), Route::Accept);
        assert_eq!(MessageRouter::route(Phase::Listen, &req, &ctx), Route::Accept);
        assert_eq!(MessageRouter::route(Phase::Listen, &agree, &ctx), Route::Defer);
        assert_eq!(MessageRouter::route(Phase::Listen, &commit, &ctx), Route::Defer);
        assert_eq!(
            MessageRouter::route(Phase::Listen, &ready, &ctx),
            Route::Drop(DropReason::Irrelevant)
        );

        assert_eq!(MessageRouter::route(Phase::Propose, &agree, &ctx), Route::Defer);
        assert_eq!(MessageRouter::route(Phase::Agree, &agree, &ctx), Route::Accept);
        assert_eq!(MessageRouter::route(Phase::Agree, &commit, &ctx), Route::Defer);
        assert_eq!(
            MessageRouter::route(Phase::Agree, &propose, &ctx),
            Route::Drop(DropReason::Irrelevant)
        );
        assert_eq!(MessageRouter::route(Phase::Commit, &commit, &ctx), Route::Accept);
        assert_eq!(
            MessageRouter::route(Phase::Commit, &agree, &ctx),
            Route::Drop(DropReason::Irrelevant)
        );
    }

    #[test]
    fn test_sync_traffic_skips_round_checks() {
        let ctx = ctx();
        // other round and other best state: a peer further along the chain
        let block: BftMessage = BlockAnnounce::new(7, Hash::of(b"ahead"), key(3), 5, vec![]).into();
        let request: BftMessage = GetBlocks::new(1, Hash::ZERO, key(2), 1).into();
        for phase in [Phase::Propose, Phase::Listen, Phase::Agree, Phase::Commit] {
            assert_eq!(MessageRouter::route(phase, &block, &ctx), Route::Sync);
            assert_eq!(MessageRouter::route(phase, &request, &ctx), Route::Sync);
        }

        let outsider: BftMessage = GetBlocks::new(2, Hash::of(b"best"), key(9), 1).into();
        assert_eq!(
            MessageRouter::route(Phase::Listen, &outsider, &ctx),
            Route::Drop(DropReason::NotMember)
        );
    }

    #[tokio::test]
    async fn test_mailbox_replays_deferred_first() {
        let (tx, mut mailbox) = Mailbox::channel();
        let best = Hash::of(b"best");
        tx.send(ready(2, best, key(1))).unwrap();

        mailbox.defer(Agree::new(2, best, key(2), vec![2], Hash::ZERO).into());
        assert_eq!(mailbox.deferred_len(), 1);
        mailbox.enter_phase();
        assert_eq!(mailbox.deferred_len(), 0);
        assert_eq!(mailbox.replay_len(), 1);

        assert_eq!(mailbox.next().await.map(|m| m.kind()), Some(MessageKind::Agree));
        assert_eq!(mailbox.next().await.map(|m| m.kind()), Some(MessageKind::Ready));
    }

    #[tokio::test]
    async fn test_mailbox_begin_round_clears_buffers() {
        let (_tx, mut mailbox) = Mailbox::channel();
        mailbox.defer(ready(1, Hash::ZERO, key(1)));
        mailbox.enter_phase();
        mailbox.defer(ready(1, Hash::ZERO, key(2)));
        mailbox.begin_round();
        assert_eq!(mailbox.replay_len(), 0);
        assert_eq!(mailbox.deferred_len(), 0);
    }

    #[test]
    fn test_block_stash_survives_rounds() {
        let (_tx, mut mailbox) = Mailbox::channel();
        assert!(mailbox.stash_block(BlockAnnounce::new(1, Hash::ZERO, key(1), 1, vec![])));
        mailbox.begin_round();
        assert_eq!(mailbox.stashed_blocks(), 1);

        for height in 2..=MAX_STASHED_BLOCKS as u64 {
            assert!(mailbox.stash_block(BlockAnnounce::new(1, Hash::ZERO, key(1), height, vec![])));
        }
        assert!(!mailbox.stash_block(BlockAnnounce::new(1, Hash::ZERO, key(1), 999, vec![])));

        let taken = mailbox.take_blocks();
        assert_eq!(taken.len(), MAX_STASHED_BLOCKS);
        assert_eq!(taken[0].height, 1);
        assert_eq!(mailbox.stashed_blocks(), 0);
    }

    #[tokio::test]
    async fn test_mailbox_closed() {
        let (tx, mut mailbox) = Mailbox::channel();
        drop(tx);
        assert!(mailbox.next().await.is_none());
        assert!(mailbox.is_closed());
        assert!(mailbox.next().await.is_none());
    }
}
