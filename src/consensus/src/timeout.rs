//! Phase deadlines and retry nudges
//!
//! This module provides:
//! - [`TimingConfig`] - base durations and pacing intervals
//! - [`PhaseSignal`] - the idempotent "phase is done" wakeup
//! - [`TimeoutController`] - one primary deadline plus an optional nudge per phase
//!
//! Every path that can end a phase (deadline, quorum reached, block accepted)
//! fires the same [`PhaseSignal`]. Firing is idempotent, so late timers and
//! repeated quorum checks cannot double-signal. Concluding a controller
//! cancels the deadline and the nudge together.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardbft_core::Layer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::Phase;

/// Timing tunables for BFT phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Base duration of Listen (and of the leader's Propose)
    pub listen_timeout: Duration,
    /// Base duration of Agree
    pub agree_timeout: Duration,
    /// Base duration of Commit
    pub commit_timeout: Duration,
    /// Added once per committee member to every phase
    pub max_network_delay: Duration,
    /// Ready re-sends a validator grants per Listen phase
    pub max_normal_retry: usize,
    pub min_beacon_block_interval: Duration,
    pub min_shard_block_interval: Duration,
    /// Sleep between rounds when this node has no committee role
    pub idle_backoff: Duration,
    /// Extra wait for the candidate block once the Propose decision is made
    pub block_creation_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_secs(20),
            agree_timeout: Duration::from_secs(4),
            commit_timeout: Duration::from_secs(4),
            max_network_delay: Duration::from_millis(150),
            max_normal_retry: 5,
            min_beacon_block_interval: Duration::from_secs(5),
            min_shard_block_interval: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(1),
            block_creation_grace: Duration::from_secs(2),
        }
    }
}

impl TimingConfig {
    /// Phase base duration scaled by committee size
    pub fn phase_duration(&self, phase: Phase, committee_size: usize) -> Duration {
        let base = match phase {
            Phase::Propose | Phase::Listen => self.listen_timeout,
            Phase::Agree => self.agree_timeout,
            Phase::Commit => self.commit_timeout,
        };
        base + self.max_network_delay * committee_size as u32
    }

    pub fn min_block_interval(&self, layer: Layer) -> Duration {
        match layer {
            Layer::Beacon => self.min_beacon_block_interval,
            Layer::Shard(_) => self.min_shard_block_interval,
        }
    }

    /// Extra Listen wait so validators never race a proposer that is
    /// producing faster than the minimum block interval
    pub fn listen_pacing(&self, layer: Layer, since_last_block: Duration) -> Duration {
        let interval = self.min_block_interval(layer);
        interval.saturating_sub(since_last_block) + interval
    }

    /// Agree deadline, stretched by the measured block verification time
    pub fn agree_duration(&self, committee_size: usize, verify_latency: Duration) -> Duration {
        self.phase_duration(Phase::Agree, committee_size) + verify_latency * 4 / 5
    }
}

/// Idempotent wakeup shared by everything that can end a phase
#[derive(Debug, Clone, Default)]
pub struct PhaseSignal(CancellationToken);

impl PhaseSignal {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Fire the signal; later calls are no-ops
    pub fn fire(&self) {
        self.0.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the signal has fired
    pub async fn fired(&self) {
        self.0.cancelled().await
    }
}

/// Primary deadline and optional retry nudge of one phase
pub struct TimeoutController {
    phase: Phase,
    signal: PhaseSignal,
    expired: Arc<AtomicBool>,
    deadline: Option<JoinHandle<()>>,
    nudge: Option<JoinHandle<()>>,
}

impl TimeoutController {
    /// Start the primary deadline of `phase`
    pub fn start(phase: Phase, duration: Duration) -> Self {
        let signal = PhaseSignal::new();
        let expired = Arc::new(AtomicBool::new(false));

        let deadline = {
            let signal = signal.clone();
            let expired = expired.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                expired.store(true, Ordering::SeqCst);
                debug!(%phase, ?duration, "Phase deadline reached");
                signal.fire();
            })
        };

        Self {
            phase,
            signal,
            expired,
            deadline: Some(deadline),
            nudge: None,
        }
    }

    /// Run `action` after `after` unless the phase has concluded by then.
    /// The nudge never touches the primary deadline.
    pub fn with_nudge<F, Fut>(mut self, after: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = self.signal.clone();
        let phase = self.phase;
        self.nudge = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = signal.fired() => {}
                _ = tokio::time::sleep(after) => {
                    if !signal.is_fired() {
                        trace!(%phase, "Retry nudge firing");
                        action().await;
                    }
                }
            }
        }));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn signal(&self) -> PhaseSignal {
        self.signal.clone()
    }

    /// Resolves when the phase should decide: deadline or early completion
    pub async fn wait(&self) {
        self.signal.fired().await
    }

    /// The primary deadline, not an early completion, fired the signal
    pub fn deadline_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// End the phase: fire the signal and cancel both timers
    pub fn conclude(&mut self) {
        self.signal.fire();
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
        if let Some(handle) = self.nudge.take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        self.conclude();
    }
}
