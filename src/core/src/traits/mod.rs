//! Collaborator traits consumed by the consensus engine

pub mod chain;
pub mod multisig;

pub use chain::ChainCollaborator;
pub use multisig::SignatureCoordinator;
