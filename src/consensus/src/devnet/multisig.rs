//! Hash-based stand-in for the multi-signature scheme
//!
//! Every value is a BLAKE3 digest keyed by a seed shared across the devnet,
//! so any node can recompute and check any other node's output. This is
//! NOT a signature scheme: anyone who knows the seed can forge. It exists
//! to exercise the Agree/Commit contract (shared R, index lists, grouping)
//! without a real cryptographic backend.

use std::collections::BTreeMap;

use shardbft_core::{
    CombinedSignature, CommitShare, CommitSig, CoreError, Hash, PublicKey, Result, SignatureCoordinator,
};

/// Deterministic [`SignatureCoordinator`] for in-process networks
#[derive(Debug, Clone)]
pub struct DevMultiSig {
    own_key: PublicKey,
    seed: Hash,
}

impl DevMultiSig {
    pub fn new(own_key: PublicKey, seed: Hash) -> Self {
        Self { own_key, seed }
    }

    pub fn own_key(&self) -> &PublicKey {
        &self.own_key
    }

    /// Ri of `signer` for `message`
    pub fn commitment_of(&self, signer: &PublicKey, message: &Hash) -> Vec<u8> {
        let mut hasher = self.hasher(b"ri");
        hasher.update(signer.as_bytes());
        hasher.update(message.as_bytes());
        hasher.finalize().as_bytes().to_vec()
    }

    /// R derived from the Ri of the given committee positions, in index order
    fn derive_r(&self, commitments: &[(usize, &[u8])]) -> String {
        let mut hasher = self.hasher(b"r");
        for (idx, ri) in commitments {
            hasher.update(&(*idx as u64).to_le_bytes());
            hasher.update(ri);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn partial_sig(&self, signer: &PublicKey, message: &Hash, r: &str, idx: &[usize]) -> String {
        let mut hasher = self.hasher(b"sig");
        hasher.update(signer.as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(r.as_bytes());
        for i in idx {
            hasher.update(&(*i as u64).to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    fn hasher(&self, domain: &[u8]) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new_keyed(self.seed.as_bytes());
        hasher.update(domain);
        hasher
    }
}

fn index_of(committee: &[PublicKey], key: &PublicKey) -> Result<usize> {
    committee
        .iter()
        .position(|k| k == key)
        .ok_or_else(|| CoreError::crypto(format!("{} is not in the committee", key)))
}

fn check_index_list(idx: &[usize], committee_size: usize) -> Result<()> {
    if idx.is_empty() {
        return Err(CoreError::crypto("empty validator index list"));
    }
    if idx.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CoreError::crypto("validator index list is not strictly increasing"));
    }
    if idx.iter().any(|i| *i >= committee_size) {
        return Err(CoreError::crypto("validator index out of range"));
    }
    Ok(())
}

impl SignatureCoordinator for DevMultiSig {
    fn generate_personal_commitment(&self, message: &Hash) -> Result<Vec<u8>> {
        Ok(self.commitment_of(&self.own_key, message))
    }

    fn sign_data(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        ri_list: &BTreeMap<PublicKey, Vec<u8>>,
    ) -> Result<CommitShare> {
        let own_idx = index_of(committee, &self.own_key)?;
        let mut commitments = ri_list
            .iter()
            .map(|(key, ri)| Ok((index_of(committee, key)?, ri.as_slice())))
            .collect::<Result<Vec<_>>>()?;
        commitments.sort_by_key(|(idx, _)| *idx);

        let validators_idx_r: Vec<usize> = commitments.iter().map(|(idx, _)| *idx).collect();
        if !validators_idx_r.contains(&own_idx) {
            return Err(CoreError::crypto("own commitment missing from Ri list"));
        }

        let r = self.derive_r(&commitments);
        let sig = self.partial_sig(&self.own_key, message, &r, &validators_idx_r);
        Ok(CommitShare {
            sig,
            r,
            validators_idx_r,
        })
    }

    fn verify_commit_sig(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        signer: &PublicKey,
        sig: &str,
        r: &str,
        validators_idx_r: &[usize],
    ) -> Result<()> {
        let signer_idx = index_of(committee, signer)?;
        check_index_list(validators_idx_r, committee.len())?;
        if !validators_idx_r.contains(&signer_idx) {
            return Err(CoreError::crypto("signer did not contribute to R"));
        }
        if self.partial_sig(signer, message, r, validators_idx_r) != sig {
            return Err(CoreError::crypto("signature mismatch"));
        }
        Ok(())
    }

    fn combine_sigs(
        &self,
        message: &Hash,
        committee: &[PublicKey],
        r: &str,
        group: &BTreeMap<PublicKey, CommitSig>,
    ) -> Result<CombinedSignature> {
        let validators_idx_r = match group.values().next() {
            Some(first) => first.validators_idx_r.clone(),
            None => return Err(CoreError::crypto("nothing to combine")),
        };

        let mut members = Vec::with_capacity(group.len());
        for (key, commit) in group {
            if commit.validators_idx_r != validators_idx_r {
                return Err(CoreError::crypto(format!(
                    "{} signed with a different index list under the same R",
                    key
                )));
            }
            self.verify_commit_sig(message, committee, key, &commit.sig, r, &commit.validators_idx_r)?;
            members.push((index_of(committee, key)?, commit.sig.as_str()));
        }
        members.sort_by_key(|(idx, _)| *idx);

        let mut hasher = self.hasher(b"agg");
        hasher.update(r.as_bytes());
        hasher.update(message.as_bytes());
        for (_, sig) in &members {
            hasher.update(sig.as_bytes());
        }

        Ok(CombinedSignature {
            aggregated_sig: hasher.finalize().to_hex().to_string(),
            validators_idx_r,
            validators_idx_agg_sig: members.into_iter().map(|(idx, _)| idx).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee() -> Vec<PublicKey> {
        (0..4u8).map(|i| PublicKey::new(vec![i; 32])).collect()
    }

    fn signers() -> Vec<DevMultiSig> {
        committee()
            .into_iter()
            .map(|k| DevMultiSig::new(k, Hash::of(b"devnet")))
            .collect()
    }

    fn ri_list(signers: &[DevMultiSig], message: &Hash, which: &[usize]) -> BTreeMap<PublicKey, Vec<u8>> {
        which
            .iter()
            .map(|i| {
                let s = &signers[*i];
                (s.own_key().clone(), s.generate_personal_commitment(message).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_same_ri_set_gives_same_r() {
        let signers = signers();
        let message = Hash::of(b"block");
        let ri = ri_list(&signers, &message, &[0, 1, 2]);

        let a = signers[0].sign_data(&message, &committee(), &ri).unwrap();
        let b = signers[2].sign_data(&message, &committee(), &ri).unwrap();
        assert_eq!(a.r, b.r);
        assert_eq!(a.validators_idx_r, vec![0, 1, 2]);
        assert_ne!(a.sig, b.sig);

        let other = signers[0]
            .sign_data(&message, &committee(), &ri_list(&signers, &message, &[0, 1]))
            .unwrap();
        assert_ne!(a.r, other.r);
    }

    #[test]
    fn test_sign_requires_own_commitment() {
        let signers = signers();
        let message = Hash::of(b"block");
        let ri = ri_list(&signers, &message, &[1, 2]);
        assert!(signers[0].sign_data(&message, &committee(), &ri).is_err());
    }

    #[test]
    fn test_verify_commit_sig() {
        let signers = signers();
        let committee = committee();
        let message = Hash::of(b"block");
        let ri = ri_list(&signers, &message, &[0, 1, 2, 3]);
        let share = signers[1].sign_data(&message, &committee, &ri).unwrap();

        let verifier = &signers[3];
        assert!(verifier
            .verify_commit_sig(&message, &committee, &committee[1], &share.sig, &share.r, &share.validators_idx_r)
            .is_ok());
        // wrong signer, tampered sig, wrong message
        assert!(verifier
            .verify_commit_sig(&message, &committee, &committee[2], &share.sig, &share.r, &share.validators_idx_r)
            .is_err());
        assert!(verifier
            .verify_commit_sig(&message, &committee, &committee[1], "00", &share.r, &share.validators_idx_r)
            .is_err());
        assert!(verifier
            .verify_commit_sig(&Hash::ZERO, &committee, &committee[1], &share.sig, &share.r, &share.validators_idx_r)
            .is_err());
        assert!(verifier
            .verify_commit_sig(&message, &committee, &committee[1], &share.sig, &share.r, &[0, 1, 9])
            .is_err());
    }

    #[test]
    fn test_combine_group() {
        let signers = signers();
        let committee = committee();
        let message = Hash::of(b"block");
        let ri = ri_list(&signers, &message, &[0, 1, 2, 3]);

        let group: BTreeMap<PublicKey, CommitSig> = [3usize, 0, 2]
            .iter()
            .map(|i| {
                let share = signers[*i].sign_data(&message, &committee, &ri).unwrap();
                (committee[*i].clone(), CommitSig::from(&share))
            })
            .collect();
        let r = signers[0].sign_data(&message, &committee, &ri).unwrap().r;

        let combined = signers[1].combine_sigs(&message, &committee, &r, &group).unwrap();
        assert_eq!(combined.validators_idx_r, vec![0, 1, 2, 3]);
        assert_eq!(combined.validators_idx_agg_sig, vec![0, 2, 3]);
        assert!(!combined.aggregated_sig.is_empty());

        let again = signers[2].combine_sigs(&message, &committee, &r, &group).unwrap();
        assert_eq!(again, combined);
    }

    #[test]
    fn test_combine_rejects_empty_and_inconsistent_groups() {
        let signers = signers();
        let committee = committee();
        let message = Hash::of(b"block");
        assert!(signers[0]
            .combine_sigs(&message, &committee, "r", &BTreeMap::new())
            .is_err());

        let full = signers[0]
            .sign_data(&message, &committee, &ri_list(&signers, &message, &[0, 1, 2]))
            .unwrap();
        let partial = signers[1]
            .sign_data(&message, &committee, &ri_list(&signers, &message, &[0, 1]))
            .unwrap();
        let group = BTreeMap::from([
            (committee[0].clone(), CommitSig::from(&full)),
            (committee[1].clone(), CommitSig::from(&partial)),
        ]);
        assert!(signers[2].combine_sigs(&message, &committee, &full.r, &group).is_err());
    }
}
