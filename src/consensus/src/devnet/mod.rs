//! In-process collaborators for local networks and tests
//!
//! [`InMemoryNetwork`], [`DevChain`], and [`DevMultiSig`] together let a
//! whole committee run in one process. None of them is suitable for
//! production: the multi-signature is a keyed hash, not a signature.

pub mod chain;
pub mod multisig;
pub mod network;

pub use chain::DevChain;
pub use multisig::DevMultiSig;
pub use network::{InMemoryNetwork, NetworkHandle, SentMessage};
