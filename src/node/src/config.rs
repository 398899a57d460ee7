//! Node configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shardbft_consensus::{TimingConfig, MAX_COMMITTEE_SIZE};
use shardbft_core::Layer;
use std::path::Path;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub devnet: DevnetSection,

    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeSection {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub colored_logs: bool,
}

/// Phase timings, all in milliseconds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsensusSection {
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_ms: u64,
    #[serde(default = "default_agree_timeout")]
    pub agree_timeout_ms: u64,
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_ms: u64,
    #[serde(default = "default_max_network_delay")]
    pub max_network_delay_ms: u64,
    #[serde(default = "default_max_normal_retry")]
    pub max_normal_retry: usize,
    #[serde(default = "default_block_interval")]
    pub min_beacon_block_interval_ms: u64,
    #[serde(default = "default_block_interval")]
    pub min_shard_block_interval_ms: u64,
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,
    #[serde(default = "default_block_creation_grace")]
    pub block_creation_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DevnetSection {
    #[serde(default = "default_committee_size")]
    pub committee_size: usize,
    /// "beacon" or "shard"
    #[serde(default = "default_layer")]
    pub layer: String,
    #[serde(default)]
    pub shard_id: u8,
    /// Stop once this many blocks are finalized
    #[serde(default = "default_target_blocks")]
    pub target_blocks: u64,
    /// Committee indexes that never come online
    #[serde(default)]
    pub offline: Vec<usize>,
    /// Per-node round limit
    #[serde(default)]
    pub max_rounds: Option<u64>,
    /// Seed for member keys and the dev multi-signature
    #[serde(default = "default_seed")]
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool { true }
fn default_node_id() -> String { "shardbft-devnet".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_listen_timeout() -> u64 { 20_000 }
fn default_agree_timeout() -> u64 { 4_000 }
fn default_commit_timeout() -> u64 { 4_000 }
fn default_max_network_delay() -> u64 { 150 }
fn default_max_normal_retry() -> usize { 5 }
fn default_block_interval() -> u64 { 5_000 }
fn default_idle_backoff() -> u64 { 1_000 }
fn default_block_creation_grace() -> u64 { 2_000 }
fn default_committee_size() -> usize { 4 }
fn default_layer() -> String { "beacon".to_string() }
fn default_target_blocks() -> u64 { 10 }
fn default_seed() -> String { "shardbft-devnet".to_string() }
fn default_metrics_host() -> String { "127.0.0.1".to_string() }
fn default_metrics_port() -> u16 { 9090 }

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            log_level: default_log_level(),
            colored_logs: true,
        }
    }
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            listen_timeout_ms: default_listen_timeout(),
            agree_timeout_ms: default_agree_timeout(),
            commit_timeout_ms: default_commit_timeout(),
            max_network_delay_ms: default_max_network_delay(),
            max_normal_retry: default_max_normal_retry(),
            min_beacon_block_interval_ms: default_block_interval(),
            min_shard_block_interval_ms: default_block_interval(),
            idle_backoff_ms: default_idle_backoff(),
            block_creation_grace_ms: default_block_creation_grace(),
        }
    }
}

impl Default for DevnetSection {
    fn default() -> Self {
        Self {
            committee_size: default_committee_size(),
            layer: default_layer(),
            shard_id: 0,
            target_blocks: default_target_blocks(),
            offline: Vec::new(),
            max_rounds: None,
            seed: default_seed(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl ConsensusSection {
    /// Engine timings
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            listen_timeout: Duration::from_millis(self.listen_timeout_ms),
            agree_timeout: Duration::from_millis(self.agree_timeout_ms),
            commit_timeout: Duration::from_millis(self.commit_timeout_ms),
            max_network_delay: Duration::from_millis(self.max_network_delay_ms),
            max_normal_retry: self.max_normal_retry,
            min_beacon_block_interval: Duration::from_millis(self.min_beacon_block_interval_ms),
            min_shard_block_interval: Duration::from_millis(self.min_shard_block_interval_ms),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            block_creation_grace: Duration::from_millis(self.block_creation_grace_ms),
        }
    }
}

impl DevnetSection {
    /// Layer the simulated committee runs on
    pub fn layer(&self) -> Result<Layer> {
        match self.layer.as_str() {
            "beacon" => Ok(Layer::Beacon),
            "shard" => Ok(Layer::Shard(self.shard_id)),
            other => anyhow::bail!("Unknown layer '{}', expected 'beacon' or 'shard'", other),
        }
    }
}

impl NodeConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {:?}", path.as_ref()))?;

        let config: NodeConfig = toml::from_str(&contents)
            .context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate consensus
        let c = &self.consensus;
        if c.listen_timeout_ms == 0 || c.agree_timeout_ms == 0 || c.commit_timeout_ms == 0 {
            anyhow::bail!("Phase timeouts must be greater than zero");
        }
        if c.idle_backoff_ms == 0 {
            anyhow::bail!("Idle backoff must be greater than zero");
        }

        // Validate devnet
        let d = &self.devnet;
        if d.committee_size == 0 {
            anyhow::bail!("Committee size must be at least 1");
        }
        if d.committee_size > MAX_COMMITTEE_SIZE {
            anyhow::bail!(
                "Committee size {} exceeds the maximum of {}",
                d.committee_size,
                MAX_COMMITTEE_SIZE
            );
        }
        d.layer()?;
        if let Some(idx) = d.offline.iter().find(|idx| **idx >= d.committee_size) {
            anyhow::bail!("Offline member {} is outside the committee of {}", idx, d.committee_size);
        }
        let mut offline = d.offline.clone();
        offline.sort_unstable();
        offline.dedup();
        if offline.len() >= d.committee_size {
            anyhow::bail!("At least one committee member must be online");
        }
        if d.max_rounds == Some(0) {
            anyhow::bail!("Max rounds must be greater than zero when set");
        }

        Ok(())
    }
}
