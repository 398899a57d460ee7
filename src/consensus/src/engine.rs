//! BFT phase engine
//!
//! One [`PhaseEngine`] drives one round from "no agreed block" to a
//! finalized, multi-signed [`PendingBlock`]:
//!
//! 1. **Propose** (leader): build the block in the background, collect Ready
//!    acknowledgements, nudge with Req at half time, broadcast the block.
//! 2. **Listen** (validators): announce Ready, wait for the block, verify it.
//! 3. **Agree**: exchange Ri commitments over the block hash, sign under R.
//! 4. **Commit**: exchange partial signatures, combine the largest R group.
//!
//! Each phase suspends only on a biased `select!` over its [`PhaseSignal`]
//! and the [`Mailbox`]. Quorum bookkeeping, routing, and signature calls run
//! synchronously between suspensions. The engine exclusively owns its round
//! context, quorum tracker, and pending block; detached tasks only read
//! collaborators and send to the network.
//!
//! Block announcements are stashed in the [`Mailbox`] for the driver and
//! block requests are answered by a detached task. An announcement for a
//! height beyond the next one ends the round with
//! [`ConsensusError::FallenBehind`].
//!
//! [`PhaseSignal`]: crate::timeout::PhaseSignal

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shardbft_core::{
    ChainCollaborator, CommitShare, CommitSig, CoreError, Hash, Layer, MultiSigned, PendingBlock,
    PublicKey, Role, SignatureCoordinator,
};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::context::RoundContext;
use crate::error::{ConsensusError, Result};
use crate::message::{Agree, BftMessage, Commit, Propose, Ready, Req};
use crate::metrics::ConsensusMetrics;
use crate::network::NetworkCollaborator;
use crate::quorum::QuorumTracker;
use crate::router::{Mailbox, MessageRouter, Route};
use crate::state::{Phase, RoundState};
use crate::sync::spawn_block_server;
use crate::timeout::{PhaseSignal, TimeoutController, TimingConfig};

/// External services a round depends on
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainCollaborator>,
    pub network: Arc<dyn NetworkCollaborator>,
    pub signer: Arc<dyn SignatureCoordinator>,
}

/// Four-phase round state machine
pub struct PhaseEngine {
    /// Committee, round, layer, and expected state
    ctx: RoundContext,

    /// This node's key
    own_key: PublicKey,

    chain: Arc<dyn ChainCollaborator>,
    network: Arc<dyn NetworkCollaborator>,
    signer: Arc<dyn SignatureCoordinator>,

    timing: TimingConfig,
    metrics: Arc<ConsensusMetrics>,

    /// Active phase
    state: RoundState,

    /// Ready, Ri, and commit signature accumulation
    tracker: QuorumTracker,

    /// Candidate block, set in Propose or Listen and taken in Commit
    pending_block: Option<PendingBlock>,

    /// Header hash of the pending block
    message_hash: Option<Hash>,

    /// Time the pre-sign verification of the received block took
    verify_latency: Duration,

    /// This node's partial signature from Agree
    commit_share: Option<CommitShare>,

    /// Pool height handed to block creation at Ready quorum
    pool_height: Option<u64>,

    /// Height of an announced block past this node's next height
    behind: Option<u64>,
}

impl PhaseEngine {
    /// Create an engine for one round. Proposers start in Propose,
    /// validators in Listen; other roles do not take part.
    pub fn new(
        ctx: RoundContext,
        own_key: PublicKey,
        role: Role,
        collaborators: Collaborators,
        timing: TimingConfig,
        metrics: Arc<ConsensusMetrics>,
    ) -> Result<Self> {
        let initial = match role {
            Role::Proposer => Phase::Propose,
            Role::Validator => Phase::Listen,
            other => {
                return Err(ConsensusError::Configuration(format!(
                    "role {:?} does not take part in round {}",
                    other,
                    ctx.round()
                )))
            }
        };
        if !ctx.is_member(&own_key) {
            return Err(ConsensusError::Configuration(format!(
                "{} is not a committee member",
                own_key
            )));
        }

        let tracker = QuorumTracker::new(ctx.size());
        Ok(Self {
            ctx,
            own_key,
            chain: collaborators.chain,
            network: collaborators.network,
            signer: collaborators.signer,
            timing,
            metrics,
            state: RoundState::new(initial),
            tracker,
            pending_block: None,
            message_hash: None,
            verify_latency: Duration::ZERO,
            commit_share: None,
            pool_height: None,
            behind: None,
        })
    }

    pub fn context(&self) -> &RoundContext {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn tracker(&self) -> &QuorumTracker {
        &self.tracker
    }

    pub fn pending_block(&self) -> Option<&PendingBlock> {
        self.pending_block.as_ref()
    }

    /// Pool height the leader proposed with, once Ready quorum is reached
    pub fn pool_height(&self) -> Option<u64> {
        self.pool_height
    }

    /// Run the round to completion. Returns the finalized block, or the
    /// round-fatal error of the phase that failed.
    pub async fn run(&mut self, mailbox: &mut Mailbox) -> Result<PendingBlock> {
        let started = Instant::now();
        mailbox.begin_round();
        self.metrics.rounds_started.inc();
        self.metrics.current_round.set(self.ctx.round() as i64);

        info!(
            round = self.ctx.round(),
            layer = %self.ctx.layer(),
            phase = %self.state.phase(),
            committee = self.ctx.size(),
            "Starting BFT round"
        );

        let mut result = self.drive(mailbox).await;
        if let (Err(_), Some(height)) = (&result, self.behind) {
            result = Err(ConsensusError::FallenBehind { height });
        }

        match &result {
            Ok(block) => {
                let elapsed = started.elapsed();
                self.metrics.rounds_succeeded.inc();
                self.metrics.round_time.observe(elapsed.as_secs_f64() * 1000.0);
                info!(
                    round = self.ctx.round(),
                    height = block.height(),
                    hash = %block.message_hash(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Block consensus reached"
                );
            }
            Err(ConsensusError::FallenBehind { height }) => {
                self.metrics.rounds_failed.with_label_values(&["sync"]).inc();
                info!(round = self.ctx.round(), height, "Abandoning round to catch up");
            }
            Err(e) => {
                let phase = e.failed_phase().map(|p| p.as_str()).unwrap_or("internal");
                self.metrics.rounds_failed.with_label_values(&[phase]).inc();
                warn!(round = self.ctx.round(), phase, error = %e, "BFT round failed");
            }
        }
        result
    }

    async fn drive(&mut self, mailbox: &mut Mailbox) -> Result<PendingBlock> {
        match self.state.phase() {
            Phase::Propose => self.phase_propose(mailbox).await?,
            Phase::Listen => self.phase_listen(mailbox).await?,
            other => {
                return Err(ConsensusError::Internal(format!(
                    "round cannot be started from {}",
                    other
                )))
            }
        }
        self.check_behind()?;

        self.enter(Phase::Agree, mailbox)?;
        self.phase_agree(mailbox).await?;
        self.check_behind()?;

        self.enter(Phase::Commit, mailbox)?;
        self.phase_commit(mailbox).await
    }

    fn check_behind(&self) -> Result<()> {
        match self.behind {
            Some(height) => Err(ConsensusError::FallenBehind { height }),
            None => Ok(()),
        }
    }

    fn enter(&mut self, next: Phase, mailbox: &mut Mailbox) -> Result<()> {
        self.state.advance(next)?;
        mailbox.enter_phase();
        debug!(round = self.ctx.round(), phase = %next, replay = mailbox.replay_len(), "Entering phase");
        Ok(())
    }

    async fn phase_propose(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        let layer = self.ctx.layer();
        let round = self.ctx.round();
        let duration = self.timing.phase_duration(Phase::Propose, self.ctx.size());

        // creation starts now and waits for the pool height agreed at quorum
        let (hint_tx, hint_rx) = oneshot::channel::<u64>();
        let mut creation = {
            let chain = self.chain.clone();
            tokio::spawn(async move {
                let pool_height = hint_rx
                    .await
                    .map_err(|_| CoreError::chain("round ended before a pool height was agreed"))?;
                chain.create_candidate_block(layer, round, pool_height).await
            })
        };

        let mut timer = {
            let network = self.network.clone();
            let req: BftMessage = Req::new(round, *self.ctx.best_state_hash(), self.own_key.clone()).into();
            let exclude = HashSet::from([self.own_key.clone()]);
            TimeoutController::start(Phase::Propose, duration).with_nudge(duration / 2, move || async move {
                info!(round, "Requesting ready messages");
                if let Err(e) = network.push(layer, &req, &exclude).await {
                    warn!(round, error = %e, "Failed to broadcast ready request");
                }
            })
        };

        info!(round, quorum = crate::quorum::ready_quorum(self.ctx.size()), "Listening for ready messages");
        if self.tracker.ready_quorum_met() {
            timer.signal().fire();
        }

        while let Some(msg) = self.next_message(Phase::Propose, &timer, mailbox).await {
            if let BftMessage::Ready(ready) = msg {
                let sender = ready.sender.clone();
                if self.tracker.record_ready(ready) {
                    self.metrics.ready_received.inc();
                    debug!(round, %sender, count = self.tracker.ready_count(), "Ready received");
                    if self.tracker.ready_quorum_met() {
                        info!(round, count = self.tracker.ready_count(), "Collected enough ready");
                        timer.signal().fire();
                    }
                }
            }
        }
        timer.conclude();

        if !self.tracker.ready_quorum_met() || self.behind.is_some() {
            creation.abort();
            self.check_behind()?;
            return Err(ConsensusError::ReadyQuorumTimeout);
        }

        let own_height = latest_valid_height(self.chain.as_ref(), layer).await;
        let pool_height = self.tracker.closest_pool_height(own_height);
        debug!(round, own_height, pool_height, "Agreed pool height");
        self.pool_height = Some(pool_height);
        if hint_tx.send(pool_height).is_err() {
            warn!(round, "Block creation task ended early");
        }

        let block = match tokio::time::timeout(self.timing.block_creation_grace, &mut creation).await {
            Ok(Ok(Ok(block))) => block,
            Ok(Ok(Err(e))) => {
                warn!(round, error = %e, "Block creation failed");
                return Err(ConsensusError::ProposeFailed);
            }
            Ok(Err(e)) => {
                warn!(round, error = %e, "Block creation task aborted");
                return Err(ConsensusError::ProposeFailed);
            }
            Err(_) => {
                creation.abort();
                warn!(round, "Block creation did not finish in time");
                return Err(ConsensusError::ProposeFailed);
            }
        };
        if block.layer() != layer {
            warn!(round, block_layer = %block.layer(), "Created block is for another layer");
            return Err(ConsensusError::ProposeFailed);
        }

        let bytes = block.to_bytes().map_err(|e| {
            warn!(round, error = %e, "Failed to encode block");
            ConsensusError::ProposeFailed
        })?;
        let msg: BftMessage = Propose::new(round, *self.ctx.best_state_hash(), self.own_key.clone(), bytes).into();
        info!(round, height = block.height(), "Propose block");
        self.broadcast(&msg).await;

        self.message_hash = Some(block.message_hash());
        self.pending_block = Some(block);
        Ok(())
    }

    async fn phase_listen(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        let layer = self.ctx.layer();
        let round = self.ctx.round();

        let ready: BftMessage = Ready::new(
            round,
            *self.ctx.best_state_hash(),
            self.own_key.clone(),
            latest_valid_height(self.chain.as_ref(), layer).await,
        )
        .into();
        self.broadcast(&ready).await;

        let since_last_block = match self.chain.last_block_time(layer).await {
            Ok(at) => (chrono::Utc::now() - at).to_std().unwrap_or(Duration::ZERO),
            Err(e) => {
                warn!(round, error = %e, "Unknown last block time, skipping pacing offset");
                Duration::ZERO
            }
        };
        let duration = self.timing.phase_duration(Phase::Listen, self.ctx.size())
            + self.timing.listen_pacing(layer, since_last_block);
        let mut timer = TimeoutController::start(Phase::Listen, duration);
        let ready_resends = Arc::new(AtomicUsize::new(0));

        info!(round, timeout_ms = duration.as_millis() as u64, "Listen phase");

        while let Some(msg) = self.next_message(Phase::Listen, &timer, mailbox).await {
            match &msg {
                BftMessage::Propose(propose) => {
                    info!(round, sender = %propose.sender, "Propose block received");
                    self.relay(&msg).await;
                    match self.accept_proposal(propose).await {
                        Ok(()) => timer.signal().fire(),
                        Err(e) => warn!(round, sender = %propose.sender, error = %e, "Proposed block rejected"),
                    }
                }
                BftMessage::Req(req) => {
                    self.spawn_req_handler(req.clone(), ready_resends.clone(), timer.signal());
                }
                _ => {}
            }
        }
        timer.conclude();

        if self.pending_block.is_none() {
            return Err(ConsensusError::ListenTimeout);
        }
        Ok(())
    }

    /// Decode and verify a proposed block; on success it becomes the pending block
    async fn accept_proposal(&mut self, propose: &Propose) -> Result<()> {
        let layer = self.ctx.layer();
        let block = PendingBlock::from_bytes(layer, &propose.block)
            .map_err(|e| ConsensusError::InvalidBlock(e.to_string()))?;

        let header = block.header();
        if header.producer != propose.sender {
            return Err(ConsensusError::InvalidBlock(format!(
                "produced by {} but proposed by {}",
                header.producer, propose.sender
            )));
        }
        if header.round != self.ctx.round() {
            return Err(ConsensusError::InvalidBlock(format!(
                "built for round {}, expected {}",
                header.round,
                self.ctx.round()
            )));
        }

        let started = Instant::now();
        let verified = match (&block, layer) {
            (PendingBlock::Beacon(b), Layer::Beacon) => self.chain.verify_pre_sign_beacon_block(b).await,
            (PendingBlock::Shard(b), Layer::Shard(shard_id)) => {
                self.chain.verify_pre_sign_shard_block(b, shard_id).await
            }
            _ => Err(CoreError::invalid("block layer does not match round")),
        };
        if let Err(e) = verified {
            self.metrics.blocks_rejected.inc();
            return Err(ConsensusError::InvalidBlock(e.to_string()));
        }

        self.verify_latency = started.elapsed();
        self.metrics
            .block_verify_time
            .observe(self.verify_latency.as_secs_f64() * 1000.0);
        self.message_hash = Some(block.message_hash());
        self.pending_block = Some(block);
        Ok(())
    }

    /// Re-send Ready if the requester is this round's proposer. Runs off the
    /// phase loop so a slow role lookup cannot stall message consumption.
    fn spawn_req_handler(&self, req: Req, resends: Arc<AtomicUsize>, signal: PhaseSignal) {
        let chain = self.chain.clone();
        let network = self.network.clone();
        let own_key = self.own_key.clone();
        let layer = self.ctx.layer();
        let round = self.ctx.round();
        let best_state_hash = *self.ctx.best_state_hash();
        let max_resends = self.timing.max_normal_retry;

        tokio::spawn(async move {
            if signal.is_fired() {
                return;
            }
            match chain.get_pubkey_role(&req.sender, layer, round).await {
                Ok(Role::Proposer) => {}
                Ok(role) => {
                    debug!(round, sender = %req.sender, ?role, "Ignoring ready request from non-proposer");
                    return;
                }
                Err(e) => {
                    warn!(round, sender = %req.sender, error = %e, "Role lookup failed");
                    return;
                }
            }
            if resends.fetch_add(1, Ordering::SeqCst) >= max_resends {
                debug!(round, max_resends, "Ready re-send limit reached");
                return;
            }

            let height = latest_valid_height(chain.as_ref(), layer).await;
            let ready: BftMessage = Ready::new(round, best_state_hash, own_key.clone(), height).into();
            let exclude = HashSet::from([own_key]);
            if let Err(e) = network.push(layer, &ready, &exclude).await {
                warn!(round, error = %e, "Failed to re-send ready");
            }
        });
    }

    async fn phase_agree(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        let round = self.ctx.round();
        let message = self
            .message_hash
            .ok_or_else(|| ConsensusError::Internal("no block to agree on".to_string()))?;

        let duration = self.timing.agree_duration(self.ctx.size(), self.verify_latency);
        let mut timer = TimeoutController::start(Phase::Agree, duration);
        info!(round, timeout_ms = duration.as_millis() as u64, "Agree phase");

        let ri = self
            .signer
            .generate_personal_commitment(&message)
            .map_err(|e| ConsensusError::Signing(e.to_string()))?;
        let agree: BftMessage =
            Agree::new(round, *self.ctx.best_state_hash(), self.own_key.clone(), ri.clone(), message).into();
        self.broadcast(&agree).await;

        self.tracker.seed_ri(self.own_key.clone(), ri);
        if self.tracker.ri_complete() {
            timer.signal().fire();
        }

        while let Some(msg) = self.next_message(Phase::Agree, &timer, mailbox).await {
            let BftMessage::Agree(agree) = &msg else {
                continue;
            };
            if agree.blk_hash != message {
                self.metrics.messages_dropped.with_label_values(&["wrong_block"]).inc();
                debug!(round, sender = %agree.sender, "Agree for a different block");
                continue;
            }
            if self.tracker.record_ri(agree.sender.clone(), agree.ri.clone()) {
                self.metrics.ri_received.inc();
                trace!(round, sender = %agree.sender, count = self.tracker.ri_count(), "Ri received");
                self.relay(&msg).await;
                if self.tracker.ri_complete() {
                    info!(round, count = self.tracker.ri_count(), "Collected enough Ri");
                    timer.signal().fire();
                }
            }
        }
        timer.conclude();

        if !self.tracker.ri_quorum_met() {
            return Err(ConsensusError::NotEnoughRi);
        }

        let share = self
            .signer
            .sign_data(&message, self.ctx.committee(), self.tracker.ri_list())
            .map_err(|e| ConsensusError::Signing(e.to_string()))?;
        debug!(round, r = %share.r, signers = share.validators_idx_r.len(), "Signed block under R");
        self.commit_share = Some(share);
        Ok(())
    }

    async fn phase_commit(&mut self, mailbox: &mut Mailbox) -> Result<PendingBlock> {
        let round = self.ctx.round();
        let message = self
            .message_hash
            .ok_or_else(|| ConsensusError::Internal("no block to commit".to_string()))?;
        let share = self
            .commit_share
            .clone()
            .ok_or_else(|| ConsensusError::Internal("no commit share".to_string()))?;

        let duration = self.timing.phase_duration(Phase::Commit, self.ctx.size());
        let mut timer = TimeoutController::start(Phase::Commit, duration);
        info!(round, timeout_ms = duration.as_millis() as u64, "Commit phase");

        let commit: BftMessage = Commit::new(
            round,
            *self.ctx.best_state_hash(),
            self.own_key.clone(),
            share.sig.clone(),
            share.r.clone(),
            share.validators_idx_r.clone(),
        )
        .into();
        self.broadcast(&commit).await;

        self.tracker.seed_commit(&share.r, self.own_key.clone(), CommitSig::from(&share));
        if self.tracker.commit_group_ready(&share.r) {
            timer.signal().fire();
        }

        while let Some(msg) = self.next_message(Phase::Commit, &timer, mailbox).await {
            let BftMessage::Commit(commit) = &msg else {
                continue;
            };
            if let Err(e) = self.signer.verify_commit_sig(
                &message,
                self.ctx.committee(),
                &commit.sender,
                &commit.commit_sig,
                &commit.r,
                &commit.validators_idx,
            ) {
                self.metrics.commits_rejected.inc();
                let err = ConsensusError::InvalidCommitSig {
                    sender: commit.sender.to_string(),
                    reason: e.to_string(),
                };
                warn!(round, error = %err, "Commit signature rejected");
                continue;
            }

            let sig = CommitSig {
                sig: commit.commit_sig.clone(),
                validators_idx_r: commit.validators_idx.clone(),
            };
            if self.tracker.record_commit(&commit.r, commit.sender.clone(), sig) {
                self.metrics.commits_received.inc();
                trace!(round, sender = %commit.sender, r = %commit.r, "Commit signature received");
                self.relay(&msg).await;
                if self.tracker.commit_group_ready(&commit.r) {
                    info!(round, size = self.tracker.commit_group_size(&commit.r), "Collected enough sigs");
                    timer.signal().fire();
                }
            }
        }
        timer.conclude();

        let (r, group) = match self.tracker.winning_group() {
            Some((r, group)) => (r.to_string(), group.clone()),
            None => {
                debug!(round, groups = self.tracker.commit_group_count(), "No R group above threshold");
                return Err(ConsensusError::NotEnoughSigs);
            }
        };

        let combined = self
            .signer
            .combine_sigs(&message, self.ctx.committee(), &r, &group)
            .map_err(|e| ConsensusError::Combination(e.to_string()))?;

        let mut block = self
            .pending_block
            .take()
            .ok_or_else(|| ConsensusError::Internal("no pending block".to_string()))?;
        block.set_multi_signature(
            &r,
            &combined.aggregated_sig,
            &combined.validators_idx_r,
            &combined.validators_idx_agg_sig,
        );
        self.state.finalize()?;
        Ok(block)
    }

    /// Next message the active phase should handle, or `None` once the phase
    /// signal fires. Deferred and dropped messages are absorbed here.
    async fn next_message(
        &mut self,
        phase: Phase,
        timer: &TimeoutController,
        mailbox: &mut Mailbox,
    ) -> Option<BftMessage> {
        loop {
            if self.behind.is_some() {
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = timer.wait() => return None,
                msg = mailbox.next() => msg,
            };
            let Some(msg) = next else {
                // inbox closed: nothing more can arrive, wait out the deadline
                timer.wait().await;
                return None;
            };

            match MessageRouter::route(phase, &msg, &self.ctx) {
                Route::Accept => return Some(msg),
                Route::Defer => {
                    self.metrics.messages_deferred.inc();
                    trace!(%phase, command = msg.command(), "Deferring message");
                    mailbox.defer(msg);
                }
                Route::Sync => self.handle_sync(msg, mailbox).await,
                Route::Drop(reason) => {
                    self.metrics.messages_dropped.with_label_values(&[reason.as_str()]).inc();
                    trace!(%phase, command = msg.command(), sender = %msg.sender(), %reason, "Dropping message");
                }
            }
        }
    }

    /// Serve block requests and stash announced blocks for the driver
    async fn handle_sync(&mut self, msg: BftMessage, mailbox: &mut Mailbox) {
        let layer = self.ctx.layer();
        match msg {
            BftMessage::GetBlocks(request) => {
                debug!(round = self.ctx.round(), sender = %request.sender, from = request.from_height, "Block request");
                spawn_block_server(
                    self.chain.clone(),
                    self.network.clone(),
                    self.own_key.clone(),
                    layer,
                    request,
                    self.metrics.clone(),
                );
            }
            BftMessage::Block(announce) => {
                let height = announce.height;
                let sender = announce.sender.clone();
                if !mailbox.stash_block(announce) {
                    debug!(height, %sender, "Block stash full, dropping announcement");
                    return;
                }
                match self.chain.best_height(layer).await {
                    Ok(best) if height > best + 1 => {
                        info!(round = self.ctx.round(), height, best, %sender, "Peer is ahead");
                        self.behind = Some(height);
                    }
                    Ok(_) => trace!(height, %sender, "Stashed announced block"),
                    Err(e) => warn!(%layer, error = %e, "Best height unavailable"),
                }
            }
            _ => {}
        }
    }

    /// Best-effort send to every peer of this layer
    async fn broadcast(&self, msg: &BftMessage) {
        let exclude = HashSet::from([self.own_key.clone()]);
        if let Err(e) = self.network.push(self.ctx.layer(), msg, &exclude).await {
            warn!(round = self.ctx.round(), command = msg.command(), error = %e, "Broadcast failed");
        }
    }

    /// Gossip a received message to everyone but its sender and this node
    async fn relay(&self, msg: &BftMessage) {
        let exclude = HashSet::from([msg.sender().clone(), self.own_key.clone()]);
        match self.network.push(self.ctx.layer(), msg, &exclude).await {
            Ok(()) => self.metrics.messages_relayed.inc(),
            Err(e) => warn!(round = self.ctx.round(), command = msg.command(), error = %e, "Relay failed"),
        }
    }
}

async fn latest_valid_height(chain: &dyn ChainCollaborator, layer: Layer) -> u64 {
    match chain.latest_valid_pending_height(layer).await {
        Ok(height) => height,
        Err(e) => {
            warn!(%layer, error = %e, "Latest valid pending height unavailable");
            0
        }
    }
}
