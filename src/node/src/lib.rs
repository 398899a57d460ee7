//! ShardBFT devnet node
//!
//! Runs a whole committee of consensus members in one process over the
//! in-memory network, and serves each member's metrics over HTTP.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{metrics_routes, run_metrics_server, DevnetSimulation, NodeReport, SimulationReport};
