//! Wire message kinds exchanged between servers, and between a server and
//! the clients attached to it.
//!
//! Field shapes follow §3/§4 of the replicated state-machine design; framing
//! and transport are an external collaborator (see the crate-level docs).

use bytes::Bytes;
use raft_types::{
    Configuration, ConsistencyLevel, LogIndex, MemberId, RequestSeq, ResponseError, SessionId,
    StatusCode, Term,
};
use raft_log::LogEntry;
use serde::{Deserialize, Serialize};

/// A generic response envelope every client-visible reply carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub status: StatusCode,
    pub error: Option<ResponseError>,
    pub result: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status: StatusCode::Ok,
            error: None,
            result: Some(result),
        }
    }

    pub fn err(error: ResponseError) -> Self {
        Self {
            status: StatusCode::Error,
            error: Some(error),
            result: None,
        }
    }
}

// ============================================================================
// Server-to-server messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub voter_id: MemberId,
    pub granted: bool,
}

/// A pre-vote round: a follower's way of testing majority reachability
/// before disrupting the term by becoming a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub term: Term,
    pub candidate_id: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub term: Term,
    pub voter_id: MemberId,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: MemberId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub commit_index: LogIndex,
    pub global_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub member_id: MemberId,
    pub success: bool,
    /// On success, the highest index now known replicated. On rejection,
    /// the resync hint: `min(prev_log_index - 1, local.last_index)`.
    pub log_index: LogIndex,
}

/// A chunk of a state-machine snapshot, for installing a follower that has
/// fallen too far behind to catch up via `AppendEntries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader_id: MemberId,
    pub snapshot_index: LogIndex,
    pub offset: u64,
    pub data: Bytes,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub member: MemberId,
    pub commit_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub server_address: String,
    pub client_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub member_id: MemberId,
}

// ============================================================================
// Client-facing messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub client_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResult {
    pub session_id: SessionId,
    pub timeout_ms: u64,
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub session: SessionId,
    pub command_seq_ack: RequestSeq,
    pub event_version_ack: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveResult {
    pub session: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub session: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub session: SessionId,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResult {
    pub session: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub session: SessionId,
    pub sequence: RequestSeq,
    pub payload: Bytes,
    pub consistency: ConsistencyLevel,
    pub tombstone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub payload: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session: SessionId,
    pub sequence: RequestSeq,
    pub version: u64,
    pub payload: Bytes,
    pub consistency: ConsistencyLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub payload: Bytes,
    pub version: u64,
}

/// A server-initiated event delivery, pushed to the session's current
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub session: SessionId,
    pub event_version: u64,
    pub event_sequence: u64,
    pub payload: Bytes,
}

/// The envelope around every message this crate produces or consumes.
///
/// `to: None` denotes a broadcast to every stateful member (used for vote
/// and poll rounds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: MemberId,
    pub to: Option<MemberId>,
    pub payload: MessagePayload,
}

impl Message {
    pub fn targeted(from: MemberId, to: MemberId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    pub fn broadcast(from: MemberId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PollRequest(PollRequest),
    PollResponse(PollResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshotRequest(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
    ConfigureRequest(ConfigureRequest),
    HeartbeatRequest(HeartbeatRequest),
    PublishRequest(PublishRequest),
}
