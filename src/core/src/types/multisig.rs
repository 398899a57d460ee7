//! Values exchanged with the multi-signature coordinator

use serde::{Deserialize, Serialize};

/// This node's partial signature, produced once enough Ri were collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitShare {
    pub sig: String,
    /// Shared randomness identifier the signature was produced under
    pub r: String,
    /// Sorted committee indexes whose Ri contributed to `r`
    pub validators_idx_r: Vec<usize>,
}

/// A peer's commit signature as stored in an R group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub sig: String,
    pub validators_idx_r: Vec<usize>,
}

impl From<&CommitShare> for CommitSig {
    fn from(share: &CommitShare) -> Self {
        CommitSig {
            sig: share.sig.clone(),
            validators_idx_r: share.validators_idx_r.clone(),
        }
    }
}

/// Result of combining one R group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedSignature {
    pub aggregated_sig: String,
    pub validators_idx_r: Vec<usize>,
    /// Sorted committee indexes whose signatures were aggregated
    pub validators_idx_agg_sig: Vec<usize>,
}
