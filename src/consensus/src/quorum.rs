//! Quorum thresholds and per-round accumulation
//!
//! All accumulation is append-only and deduplicated by sender: the first
//! accepted message from a sender is authoritative and later ones are
//! ignored. Commit signatures are grouped by the R value they were produced
//! under and groups are never merged.

use std::collections::{BTreeMap, HashMap};

use shardbft_core::{CommitSig, PublicKey};

use crate::message::Ready;

/// Ready acknowledgements the leader needs before proposing
pub fn ready_quorum(committee_size: usize) -> usize {
    (2 * committee_size / 3).saturating_sub(1)
}

/// Ri contributions needed to sign at the Agree deadline
pub fn agree_quorum(committee_size: usize) -> usize {
    2 * committee_size / 3
}

/// Size a commit group must strictly exceed to be combined
pub fn commit_threshold(committee_size: usize) -> usize {
    2 * committee_size / 3
}

/// Accumulated acknowledgements, commitments, and signatures of one round
#[derive(Debug, Clone)]
pub struct QuorumTracker {
    committee_size: usize,
    ready: HashMap<PublicKey, Ready>,
    ri: BTreeMap<PublicKey, Vec<u8>>,
    commits: BTreeMap<String, BTreeMap<PublicKey, CommitSig>>,
}

impl QuorumTracker {
    pub fn new(committee_size: usize) -> Self {
        Self {
            committee_size,
            ready: HashMap::new(),
            ri: BTreeMap::new(),
            commits: BTreeMap::new(),
        }
    }

    pub fn committee_size(&self) -> usize {
        self.committee_size
    }

    // Propose

    /// Record a Ready; returns false if the sender was already counted
    pub fn record_ready(&mut self, msg: Ready) -> bool {
        if self.ready.contains_key(&msg.sender) {
            return false;
        }
        self.ready.insert(msg.sender.clone(), msg);
        true
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn ready_from(&self, sender: &PublicKey) -> Option<&Ready> {
        self.ready.get(sender)
    }

    pub fn ready_quorum_met(&self) -> bool {
        self.ready.len() >= ready_quorum(self.committee_size)
    }

    /// Highest pool height that `own` and every counted Ready sender have
    /// validated, so the proposal never references content a signer lacks
    pub fn closest_pool_height(&self, own: u64) -> u64 {
        self.ready
            .values()
            .map(|ready| ready.latest_valid_height)
            .fold(own, u64::min)
    }

    // Agree

    /// Seed this node's own Ri before peers' arrive
    pub fn seed_ri(&mut self, own: PublicKey, ri: Vec<u8>) {
        self.ri.entry(own).or_insert(ri);
    }

    /// Record a peer's Ri; returns false for a duplicate sender
    pub fn record_ri(&mut self, sender: PublicKey, ri: Vec<u8>) -> bool {
        if self.ri.contains_key(&sender) {
            return false;
        }
        self.ri.insert(sender, ri);
        true
    }

    pub fn ri_count(&self) -> usize {
        self.ri.len()
    }

    /// Every committee member contributed
    pub fn ri_complete(&self) -> bool {
        self.ri.len() == self.committee_size
    }

    pub fn ri_quorum_met(&self) -> bool {
        self.ri.len() >= agree_quorum(self.committee_size)
    }

    pub fn ri_list(&self) -> &BTreeMap<PublicKey, Vec<u8>> {
        &self.ri
    }

    // Commit

    /// Seed this node's own commit signature into its R group
    pub fn seed_commit(&mut self, r: &str, own: PublicKey, sig: CommitSig) {
        self.commits.entry(r.to_string()).or_default().entry(own).or_insert(sig);
    }

    /// Record a verified commit signature; returns false if the sender is
    /// already in the group for `r`
    pub fn record_commit(&mut self, r: &str, sender: PublicKey, sig: CommitSig) -> bool {
        let group = self.commits.entry(r.to_string()).or_default();
        if group.contains_key(&sender) {
            return false;
        }
        group.insert(sender, sig);
        true
    }

    pub fn commit_group(&self, r: &str) -> Option<&BTreeMap<PublicKey, CommitSig>> {
        self.commits.get(r)
    }

    pub fn commit_group_size(&self, r: &str) -> usize {
        self.commits.get(r).map(|g| g.len()).unwrap_or(0)
    }

    pub fn commit_group_count(&self) -> usize {
        self.commits.len()
    }

    /// Group for `r` is large enough to combine
    pub fn commit_group_ready(&self, r: &str) -> bool {
        self.commit_group_size(r) > commit_threshold(self.committee_size)
    }

    /// Largest group above the threshold; ties go to the smallest R
    pub fn winning_group(&self) -> Option<(&str, &BTreeMap<PublicKey, CommitSig>)> {
        let threshold = commit_threshold(self.committee_size);
        let mut best: Option<(&str, &BTreeMap<PublicKey, CommitSig>)> = None;
        for (r, group) in &self.commits {
            if group.len() <= threshold {
                continue;
            }
            match best {
                Some((_, current)) if current.len() >= group.len() => {}
                _ => best = Some((r.as_str(), group)),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shardbft_core::Hash;

    fn key(i: u8) -> PublicKey {
        PublicKey::new(vec![i; 32])
    }

    fn sig(s: &str) -> CommitSig {
        CommitSig {
            sig: s.to_string(),
            validators_idx_r: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        // N: (ready, agree, commit must exceed)
        assert_eq!((ready_quorum(4), agree_quorum(4), commit_threshold(4)), (1, 2, 2));
        assert_eq!((ready_quorum(5), agree_quorum(5), commit_threshold(5)), (2, 3, 3));
        assert_eq!((ready_quorum(6), agree_quorum(6), commit_threshold(6)), (3, 4, 4));
        assert_eq!((ready_quorum(7), agree_quorum(7), commit_threshold(7)), (3, 4, 4));
    }

    #[test]
    fn test_closest_pool_height() {
        let mut tracker = QuorumTracker::new(4);
        assert_eq!(tracker.closest_pool_height(7), 7);

        tracker.record_ready(Ready::new(1, Hash::ZERO, key(1), 9));
        assert_eq!(tracker.closest_pool_height(7), 7);
        tracker.record_ready(Ready::new(1, Hash::ZERO, key(2), 5));
        assert_eq!(tracker.closest_pool_height(7), 5);

        // a repeated Ready does not replace the first report
        assert!(!tracker.record_ready(Ready::new(1, Hash::ZERO, key(2), 1)));
        assert_eq!(tracker.closest_pool_height(7), 5);
    }

    #[test]
    fn test_small_committees_do_not_underflow() {
        assert_eq!(ready_quorum(0), 0);
        assert_eq!(ready_quorum(1), 0);
        assert_eq!(ready_quorum(2), 0);
        assert_eq!(ready_quorum(3), 1);
    }

    #[test]
    fn test_ready_first_wins() {
        let mut tracker = QuorumTracker::new(7);
        assert!(tracker.record_ready(Ready::new(1, Hash::ZERO, key(1), 10)));
        assert!(!tracker.record_ready(Ready::new(1, Hash::ZERO, key(1), 99)));
        assert_eq!(tracker.ready_count(), 1);
        assert_eq!(tracker.ready_from(&key(1)).map(|r| r.latest_valid_height), Some(10));
        assert!(!tracker.ready_quorum_met());

        tracker.record_ready(Ready::new(1, Hash::ZERO, key(2), 10));
        tracker.record_ready(Ready::new(1, Hash::ZERO, key(3), 10));
        assert!(tracker.ready_quorum_met());
    }

    #[test]
    fn test_ri_idempotent() {
        let mut tracker = QuorumTracker::new(4);
        tracker.seed_ri(key(0), vec![0]);
        assert!(tracker.record_ri(key(1), vec![1]));
        assert!(!tracker.record_ri(key(1), vec![1]));
        assert!(!tracker.record_ri(key(0), vec![9]));
        assert_eq!(tracker.ri_count(), 2);
        assert_eq!(tracker.ri_list()[&key(0)], vec![0]);
        assert!(tracker.ri_quorum_met());
        assert!(!tracker.ri_complete());

        tracker.record_ri(key(2), vec![2]);
        tracker.record_ri(key(3), vec![3]);
        assert!(tracker.ri_complete());
    }

    #[test]
    fn test_commit_groups_stay_separate() {
        let mut tracker = QuorumTracker::new(4);
        tracker.seed_commit("r1", key(0), sig("a"));
        assert!(tracker.record_commit("r1", key(1), sig("b")));
        assert!(tracker.record_commit("r2", key(2), sig("c")));
        assert!(tracker.record_commit("r2", key(3), sig("d")));
        // same sender under another R is a separate entry
        assert!(tracker.record_commit("r2", key(0), sig("e")));
        assert!(!tracker.record_commit("r1", key(1), sig("b")));

        assert_eq!(tracker.commit_group_count(), 2);
        assert_eq!(tracker.commit_group_size("r1"), 2);
        assert_eq!(tracker.commit_group_size("r2"), 3);
        assert!(!tracker.commit_group_ready("r1"));
        assert!(tracker.commit_group_ready("r2"));
        assert_eq!(tracker.winning_group().map(|(r, _)| r), Some("r2"));
    }

    #[test]
    fn test_two_pairs_have_no_winner() {
        let mut tracker = QuorumTracker::new(4);
        tracker.seed_commit("ra", key(0), sig("a"));
        tracker.record_commit("ra", key(1), sig("b"));
        tracker.record_commit("rb", key(2), sig("c"));
        tracker.record_commit("rb", key(3), sig("d"));
        assert!(tracker.winning_group().is_none());
    }

    #[test]
    fn test_winning_group_tie_break_is_smallest_r() {
        let mut tracker = QuorumTracker::new(4);
        for i in 0..3 {
            tracker.record_commit("zz", key(i), sig("z"));
            tracker.record_commit("aa", key(i), sig("a"));
        }
        assert_eq!(tracker.winning_group().map(|(r, _)| r), Some("aa"));
    }

    proptest! {
        #[test]
        fn test_thresholds_are_ordered(n in 1usize..500) {
            prop_assert!(ready_quorum(n) <= agree_quorum(n));
            prop_assert!(agree_quorum(n) <= n);
            prop_assert_eq!(commit_threshold(n), agree_quorum(n));
            // a combinable group always exists when everyone signs under one R
            prop_assert!(n > commit_threshold(n));
        }

        #[test]
        fn test_duplicates_never_grow_sets(senders in prop::collection::vec(0u8..10, 0..60)) {
            let mut tracker = QuorumTracker::new(10);
            for s in &senders {
                tracker.record_ri(key(*s), vec![*s]);
                tracker.record_commit("r", key(*s), sig("s"));
            }
            let distinct: std::collections::HashSet<_> = senders.iter().collect();
            prop_assert_eq!(tracker.ri_count(), distinct.len());
            prop_assert_eq!(tracker.commit_group_size("r"), distinct.len());
        }
    }
}
