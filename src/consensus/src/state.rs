//! Round phase state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConsensusError, Result};

/// Phase of a BFT round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Leader collects Ready and broadcasts the block
    Propose,
    /// Validator waits for the leader's block
    Listen,
    /// Members exchange Ri commitments
    Agree,
    /// Members exchange partial signatures and combine one R group
    Commit,
}

impl Phase {
    /// Position in the round; Propose and Listen are alternatives for the first slot
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Propose | Phase::Listen => 0,
            Phase::Agree => 1,
            Phase::Commit => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Propose => "propose",
            Phase::Listen => "listen",
            Phase::Agree => "agree",
            Phase::Commit => "commit",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active phase of one round; transitions only move forward
#[derive(Debug, Clone)]
pub struct RoundState {
    phase: Phase,
    finalized: bool,
}

impl RoundState {
    pub fn new(initial: Phase) -> Self {
        Self {
            phase: initial,
            finalized: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Move to the next phase
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if self.finalized || next.rank() != self.phase.rank() + 1 {
            return Err(ConsensusError::Internal(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Mark the round's block as finalized; allowed once, from Commit
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized || self.phase != Phase::Commit {
            return Err(ConsensusError::Internal(format!(
                "cannot finalize from {} (finalized: {})",
                self.phase, self.finalized
            )));
        }
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut state = RoundState::new(Phase::Listen);
        state.advance(Phase::Agree).unwrap();
        state.advance(Phase::Commit).unwrap();
        state.finalize().unwrap();
        assert!(state.is_finalized());
    }

    #[test]
    fn test_no_repeat_or_skip() {
        let mut state = RoundState::new(Phase::Propose);
        assert!(state.advance(Phase::Commit).is_err());
        assert!(state.advance(Phase::Listen).is_err());
        state.advance(Phase::Agree).unwrap();
        assert!(state.advance(Phase::Agree).is_err());
        assert!(state.finalize().is_err());
    }

    #[test]
    fn test_finalize_once() {
        let mut state = RoundState::new(Phase::Propose);
        state.advance(Phase::Agree).unwrap();
        state.advance(Phase::Commit).unwrap();
        state.finalize().unwrap();
        assert!(state.finalize().is_err());
    }
}
