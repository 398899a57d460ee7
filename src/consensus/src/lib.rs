//! Committee BFT consensus for ShardBFT
//!
//! Every beacon or shard block is agreed on by a fixed committee of N
//! members in a four-phase round:
//!
//! 1. **Propose**: the round's leader waits for Ready from enough validators
//!    and broadcasts its candidate block
//! 2. **Listen**: validators announce Ready and verify the proposed block
//! 3. **Agree**: members exchange personal commitments Ri and sign under R
//! 4. **Commit**: members exchange partial signatures and combine the
//!    largest group that signed under the same R
//!
//! ## Thresholds
//!
//! | Phase   | Condition                             |
//! |---------|---------------------------------------|
//! | Propose | `ready >= floor(2N/3) - 1`            |
//! | Agree   | `ri >= floor(2N/3)` at the deadline   |
//! | Commit  | `group > floor(2N/3)`                 |
//!
//! A failed round is retried by [`RoundDriver`] with the next round number.
//! Finalized blocks are announced to the committee, and a member that
//! missed heights catches up through [`BlockSync`].
//! The [`devnet`] module wires a whole committee together in one process.

pub mod context;
pub mod devnet;
pub mod driver;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;
pub mod network;
pub mod quorum;
pub mod router;
pub mod state;
pub mod sync;
pub mod timeout;

pub use context::RoundContext;
pub use driver::{DriverStats, RoundDriver};
pub use engine::{Collaborators, PhaseEngine};
pub use error::{ConsensusError, Result};
pub use message::{
    Agree, BftMessage, BlockAnnounce, Commit, GetBlocks, MessageKind, Propose, Ready, Req, MAX_COMMITTEE_SIZE,
};
pub use metrics::ConsensusMetrics;
pub use network::NetworkCollaborator;
pub use quorum::{agree_quorum, commit_threshold, ready_quorum, QuorumTracker};
pub use router::{DropReason, Mailbox, MessageRouter, Route};
pub use state::{Phase, RoundState};
pub use sync::BlockSync;
pub use timeout::{PhaseSignal, TimeoutController, TimingConfig};
