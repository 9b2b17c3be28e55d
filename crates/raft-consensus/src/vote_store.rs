//! Durable vote persistence, injected into [`crate::replica::ReplicaState`]
//! the way `raft-log`'s `Buffer` trait is injected into the log — the core
//! only knows the seam, not the concrete storage.
//!
//! §4.4 requires `voted_for` to reach durable storage *before* a vote or
//! poll is granted, or before this replica starts a candidacy: otherwise a
//! crash and restart could grant a second, conflicting vote within the same
//! term.

use raft_types::{MemberId, Term};

use crate::error::ConsensusError;

/// Persists `(term, voted_for)` ahead of any action that depends on it
/// being durable.
pub trait VoteStore: std::fmt::Debug {
    fn persist_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), ConsensusError>;
}

impl VoteStore for raft_log::MetaStore {
    fn persist_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), ConsensusError> {
        raft_log::MetaStore::persist_vote(self, term, voted_for)
            .map_err(|e| ConsensusError::VotePersistenceFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingVoteStore {
        calls: Vec<(Term, Option<MemberId>)>,
    }

    impl VoteStore for RecordingVoteStore {
        fn persist_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), ConsensusError> {
            self.calls.push((term, voted_for));
            Ok(())
        }
    }

    #[test]
    fn recording_store_observes_persisted_votes() {
        let mut store = RecordingVoteStore::default();
        store.persist_vote(Term::new(2), Some(MemberId::new(1))).unwrap();
        assert_eq!(store.calls, vec![(Term::new(2), Some(MemberId::new(1)))]);
    }
}
