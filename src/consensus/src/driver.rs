//! Round driver
//!
//! Runs one [`PhaseEngine`] per round for a single layer: looks up this
//! node's role, runs the round, inserts the finalized block, and moves on.
//! A round-fatal error retries the same height with the next round number,
//! which hands the proposal to another committee member. Every inserted
//! block is announced, and blocks announced by peers are applied before the
//! next round starts.

use std::sync::Arc;

use shardbft_core::{Layer, PublicKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::RoundContext;
use crate::engine::{Collaborators, PhaseEngine};
use crate::error::Result;
use crate::metrics::ConsensusMetrics;
use crate::router::Mailbox;
use crate::sync::BlockSync;
use crate::timeout::TimingConfig;

/// Outcome counters of a driver run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Rounds this node took part in
    pub rounds: u64,
    /// Blocks finalized and inserted
    pub finalized: u64,
    /// Rounds that ended with a round-fatal error
    pub failed: u64,
    /// Blocks inserted from peer announcements
    pub synced: u64,
}

/// Drives consecutive BFT rounds on one layer
pub struct RoundDriver {
    own_key: PublicKey,
    layer: Layer,
    collaborators: Collaborators,
    timing: TimingConfig,
    metrics: Arc<ConsensusMetrics>,
    mailbox: Mailbox,
    shutdown: CancellationToken,
    max_rounds: Option<u64>,
    target_height: Option<u64>,
}

impl RoundDriver {
    pub fn new(
        own_key: PublicKey,
        layer: Layer,
        collaborators: Collaborators,
        timing: TimingConfig,
        metrics: Arc<ConsensusMetrics>,
        mailbox: Mailbox,
    ) -> Self {
        Self {
            own_key,
            layer,
            collaborators,
            timing,
            metrics,
            mailbox,
            shutdown: CancellationToken::new(),
            max_rounds: None,
            target_height: None,
        }
    }

    /// Stop when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Stop after taking part in `rounds` rounds
    pub fn with_max_rounds(mut self, rounds: u64) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Stop once the chain reaches `height`
    pub fn with_target_height(mut self, height: u64) -> Self {
        self.target_height = Some(height);
        self
    }

    /// Token that stops this driver
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run rounds until shutdown, the round limit, or the target height.
    /// Collaborator failures outside a round are returned as errors.
    pub async fn run(mut self) -> Result<DriverStats> {
        let chain = self.collaborators.chain.clone();
        let shutdown = self.shutdown.clone();
        let sync = BlockSync::new(self.own_key.clone(), self.layer, &self.collaborators, self.metrics.clone());
        let mut stats = DriverStats::default();
        let mut height = chain.best_height(self.layer).await?;
        let mut round: u64 = 1;

        info!(layer = %self.layer, node = %self.own_key, height, "Starting round driver");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if self.max_rounds.is_some_and(|max| stats.rounds >= max) {
                debug!(rounds = stats.rounds, "Round limit reached");
                break;
            }

            let announced = self.mailbox.take_blocks();
            if !announced.is_empty() {
                match sync.apply(announced, round).await {
                    Ok(inserted) => stats.synced += inserted,
                    Err(e) => warn!(height, error = %e, "Failed to apply announced blocks"),
                }
            }

            let best = chain.best_height(self.layer).await?;
            if self.target_height.is_some_and(|target| best >= target) {
                debug!(height = best, "Target height reached");
                break;
            }
            if best != height {
                height = best;
                round = 1;
            }

            let role = chain.get_pubkey_role(&self.own_key, self.layer, round).await?;
            if !role.is_committee() {
                debug!(height, round, ?role, "Not in committee, backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.timing.idle_backoff) => continue,
                }
            }

            let ctx = RoundContext::new(
                chain.committee(self.layer).await?,
                round,
                self.layer,
                chain.best_state_hash(self.layer).await?,
            )?;
            let mut engine = PhaseEngine::new(
                ctx,
                self.own_key.clone(),
                role,
                self.collaborators.clone(),
                self.timing.clone(),
                self.metrics.clone(),
            )?;
            stats.rounds += 1;

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = engine.run(&mut self.mailbox) => outcome,
            };

            match outcome {
                Ok(block) => match chain.insert_block(block.clone()).await {
                    Ok(()) => {
                        stats.finalized += 1;
                        sync.announce(&block).await;
                    }
                    Err(e) => {
                        // another path already moved the chain; the height check above resyncs
                        warn!(height = height + 1, round, error = %e, "Failed to insert finalized block");
                        stats.failed += 1;
                        round += 1;
                    }
                },
                Err(e) if e.is_round_fatal() => {
                    stats.failed += 1;
                    round += 1;
                    info!(height = height + 1, next_round = round, "Retrying with next round");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            layer = %self.layer,
            rounds = stats.rounds,
            finalized = stats.finalized,
            failed = stats.failed,
            synced = stats.synced,
            "Round driver stopped"
        );
        Ok(stats)
    }
}
