//! Multi-party signature coordinator trait
//!
//! The coordinator hides the scheme's algebra. The engine only relies on the
//! protocol contract: commitments are exchanged in Agree, partial signatures
//! are produced under a shared R in Agree, and same-R partial signatures are
//! verified and combined in Commit.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{CombinedSignature, CommitShare, CommitSig, Hash, PublicKey};

/// Multi-signature primitive used by the Agree and Commit phases
pub trait SignatureCoordinator: Send + Sync {
    /// This node's personal commitment Ri for `message`
    fn generate_personal_commitment(&self, message: &Hash) -> Result<Vec<u8>>;

    /// Derive R from the collected commitments and sign `message` under it
    fn sign_data(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        ri_list: &BTreeMap<PublicKey, Vec<u8>>,
    ) -> Result<CommitShare>;

    /// Check a peer's partial signature against its claimed R and index list
    fn verify_commit_sig(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        signer: &PublicKey,
        sig: &str,
        r: &str,
        validators_idx_r: &[usize],
    ) -> Result<()>;

    /// Aggregate a same-R group of partial signatures
    fn combine_sigs(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        r: &str,
        group: &BTreeMap<PublicKey, CommitSig>,
    ) -> Result<CombinedSignature>;
}
