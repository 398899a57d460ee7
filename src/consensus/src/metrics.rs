//! Prometheus metrics for BFT rounds

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::error::Result;

const NAMESPACE: &str = "shardbft";

/// Consensus metrics exposed to Prometheus
///
/// Each instance owns its registry, so several nodes can run in one process.
pub struct ConsensusMetrics {
    /// Rounds entered
    pub rounds_started: IntCounter,

    /// Rounds that finalized a block
    pub rounds_succeeded: IntCounter,

    /// Rounds that failed, labelled by phase
    pub rounds_failed: IntCounterVec,

    /// Ready acknowledgements accepted by the leader
    pub ready_received: IntCounter,

    /// Ri contributions accepted
    pub ri_received: IntCounter,

    /// Commit signatures accepted
    pub commits_received: IntCounter,

    /// Commit signatures that failed verification
    pub commits_rejected: IntCounter,

    /// Proposed blocks that failed pre-sign verification
    pub blocks_rejected: IntCounter,

    /// Messages held for a later phase
    pub messages_deferred: IntCounter,

    /// Messages dropped, labelled by reason
    pub messages_dropped: IntCounterVec,

    /// Messages relayed to peers
    pub messages_relayed: IntCounter,

    /// Finalized blocks inserted from peer announcements
    pub blocks_synced: IntCounter,

    /// Finalized blocks served to peers that asked for them
    pub blocks_served: IntCounter,

    /// Current round number
    pub current_round: IntGauge,

    /// Block pre-sign verification time in milliseconds
    pub block_verify_time: Histogram,

    /// Round time in milliseconds, successful rounds only
    pub round_time: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl ConsensusMetrics {
    /// Create new consensus metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let rounds_started = IntCounter::with_opts(
            Opts::new("bft_rounds_started_total", "Total BFT rounds started").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(rounds_started.clone()))?;

        let rounds_succeeded = IntCounter::with_opts(
            Opts::new("bft_rounds_succeeded_total", "Total BFT rounds that finalized a block")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(rounds_succeeded.clone()))?;

        let rounds_failed = IntCounterVec::new(
            Opts::new("bft_rounds_failed_total", "Total BFT rounds failed, by phase").namespace(NAMESPACE),
            &["phase"],
        )?;
        registry.register(Box::new(rounds_failed.clone()))?;

        let ready_received = IntCounter::with_opts(
            Opts::new("bft_ready_received_total", "Total Ready messages accepted").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(ready_received.clone()))?;

        let ri_received = IntCounter::with_opts(
            Opts::new("bft_ri_received_total", "Total Ri contributions accepted").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(ri_received.clone()))?;

        let commits_received = IntCounter::with_opts(
            Opts::new("bft_commits_received_total", "Total commit signatures accepted")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(commits_received.clone()))?;

        let commits_rejected = IntCounter::with_opts(
            Opts::new(
                "bft_commits_rejected_total",
                "Total commit signatures that failed verification",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(commits_rejected.clone()))?;

        let blocks_rejected = IntCounter::with_opts(
            Opts::new(
                "bft_blocks_rejected_total",
                "Total proposed blocks that failed verification",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let messages_deferred = IntCounter::with_opts(
            Opts::new("bft_messages_deferred_total", "Total messages held for a later phase")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(messages_deferred.clone()))?;

        let messages_dropped = IntCounterVec::new(
            Opts::new("bft_messages_dropped_total", "Total messages dropped, by reason")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        registry.register(Box::new(messages_dropped.clone()))?;

        let messages_relayed = IntCounter::with_opts(
            Opts::new("bft_messages_relayed_total", "Total messages relayed to peers")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(messages_relayed.clone()))?;

        let blocks_synced = IntCounter::with_opts(
            Opts::new("bft_blocks_synced_total", "Total finalized blocks inserted from peers")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(blocks_synced.clone()))?;

        let blocks_served = IntCounter::with_opts(
            Opts::new("bft_blocks_served_total", "Total finalized blocks sent to lagging peers")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(blocks_served.clone()))?;

        let current_round = IntGauge::with_opts(
            Opts::new("bft_current_round", "Current BFT round number").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(current_round.clone()))?;

        let block_verify_time = Histogram::with_opts(
            HistogramOpts::new(
                "bft_block_verify_time_ms",
                "Block pre-sign verification time in milliseconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]),
        )?;
        registry.register(Box::new(block_verify_time.clone()))?;

        let round_time = Histogram::with_opts(
            HistogramOpts::new("bft_round_time_ms", "Successful round time in milliseconds")
                .namespace(NAMESPACE)
                .buckets(vec![
                    100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0, 40000.0,
                ]),
        )?;
        registry.register(Box::new(round_time.clone()))?;

        Ok(Self {
            rounds_started,
            rounds_succeeded,
            rounds_failed,
            ready_received,
            ri_received,
            commits_received,
            commits_rejected,
            blocks_rejected,
            messages_deferred,
            messages_dropped,
            messages_relayed,
            blocks_synced,
            blocks_served,
            current_round,
            block_verify_time,
            round_time,
            registry: Arc::new(registry),
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::ConsensusError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ConsensusMetrics::new().unwrap();

        // Initial values
        assert_eq!(metrics.rounds_started.get(), 0);
        assert_eq!(metrics.commits_received.get(), 0);

        // Increment
        metrics.rounds_started.inc();
        metrics.rounds_failed.with_label_values(&["agree"]).inc();
        assert_eq!(metrics.rounds_started.get(), 1);
        assert_eq!(metrics.rounds_failed.with_label_values(&["agree"]).get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        let a = ConsensusMetrics::new().unwrap();
        let b = ConsensusMetrics::new().unwrap();
        a.rounds_succeeded.inc();
        assert_eq!(b.rounds_succeeded.get(), 0);
    }

    #[test]
    fn test_metrics_export() {
        let metrics = ConsensusMetrics::new().unwrap();
        metrics.rounds_succeeded.inc();

        let exported = metrics.export().unwrap();
        assert!(exported.contains("shardbft_bft_rounds_succeeded_total"));
    }
}
