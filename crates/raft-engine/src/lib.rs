//! # raft-engine
//!
//! Top-level facade over the replicated state-machine engine: re-exports
//! [`raft_types`] (wire/domain types), [`raft_log`] (segmented, compacting
//! log storage), and [`raft_consensus`] (the role state machine and session
//! layer) as a single dependency surface, the way `kimberlite` sits over
//! `kimberlite-vsr`/`kimberlite-storage`/`kimberlite-kernel`.
//!
//! This crate adds no behavior of its own. An embedder drives a
//! [`ReplicaState`] with [`ReplicaEvent`]s, persists the [`LogEntry`]
//! appends and sends the outbound messages an event produces, and supplies
//! a [`StateMachine`] impl for its own command/query payloads; everything
//! touching the wire, clock, or disk is the embedder's responsibility.

pub use raft_consensus::{
    message::{Message, MessagePayload, PublishRequest},
    replica::session_apply::StateMachine,
    ClientCompletion, ClusterConfig, CommandOutcome, ConsensusError, DeterministicClock, Event,
    ReplicaEvent, ReplicaOutput, ReplicaState, SessionError, SessionRegistry, TimeoutKind,
    VoteStore,
};
pub use raft_log::{
    buffer::{Buffer, FileBuffer},
    EntryKind, LogEntry, LogError, Segment, SegmentedLog,
};
pub use raft_types::{
    Configuration, ConsistencyLevel, EventSequence, EventVersion, LogIndex, Member, MemberId,
    MemberStatus, MemberType, RaftError, RequestSeq, Role, SessionId, Term, Timestamp,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// A trivial echo state machine used to exercise the facade surface end
    /// to end without pulling in a real application.
    struct EchoStateMachine;

    impl StateMachine for EchoStateMachine {
        fn apply(&mut self, payload: &bytes::Bytes) -> Result<bytes::Bytes, String> {
            Ok(payload.clone())
        }

        fn query(&self, payload: &bytes::Bytes) -> bytes::Bytes {
            payload.clone()
        }
    }

    #[test]
    fn facade_reexports_are_usable_end_to_end() {
        let member = Member::new(
            MemberId::new(1),
            MemberType::Active,
            "127.0.0.1:9001".to_string(),
            "127.0.0.1:9101".to_string(),
        );
        let configuration = Configuration::new(LogIndex::new(0), vec![member]);
        let mut state =
            ReplicaState::new(MemberId::new(1), configuration, ClusterConfig::default());
        let mut machine = EchoStateMachine;

        let (next, output) = state.process(ReplicaEvent::Timeout(TimeoutKind::Election), &mut machine);
        state = next;

        assert!(state.is_leader());
        assert!(output.log_appends.iter().any(|entry| matches!(entry.kind, EntryKind::NoOp { .. })));
    }
}
