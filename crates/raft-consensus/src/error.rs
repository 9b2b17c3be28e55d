//! Error taxonomy for the consensus and session layers. See §7: fatal log
//! invariant violations are not represented here and `panic!` at the call
//! site instead.

use raft_types::{MemberId, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("not the leader; last known leader is {leader:?}")]
    NotLeader { leader: Option<MemberId> },

    #[error("stale term: local term {local} rejects message at term {incoming}")]
    StaleTerm { local: u64, incoming: u64 },

    #[error("log consistency mismatch at prev_log_index {prev_log_index}")]
    ConsistencyMismatch { prev_log_index: u64 },

    #[error("member {0} cannot serve this request in its current role")]
    IllegalMemberState(MemberId),

    #[error("a configuration change is already pending commit")]
    ReconfigurationInProgress,

    #[error("heartbeat round required for linearizable read failed to reach a majority")]
    LinearizabilityRoundFailed,

    #[error("failed to persist vote state durably: {0}")]
    VotePersistenceFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown or expired session {0}")]
    UnknownSession(SessionId),

    #[error("session {0} is already closed")]
    AlreadyClosed(SessionId),

    #[error("state machine rejected the operation: {0}")]
    ApplicationError(String),
}
