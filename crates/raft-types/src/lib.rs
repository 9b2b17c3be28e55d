//! # raft-types: Core type definitions for the replicated state-machine engine
//!
//! This crate contains shared types used across the consensus, log, and
//! session layers:
//! - Identifiers ([`Term`], [`LogIndex`], [`MemberId`], [`SessionId`])
//! - Temporal types ([`Timestamp`])
//! - Membership ([`MemberType`], [`MemberStatus`], [`Member`], [`Configuration`])
//! - Session sequencing ([`RequestSeq`], [`EventVersion`], [`EventSequence`])
//! - Consistency levels ([`ConsistencyLevel`])
//! - Roles ([`Role`])
//! - The error taxonomy ([`RaftError`], [`StatusCode`])

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers — all Copy (cheap 8-byte values)
// ============================================================================

/// A Raft election term.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Self(term)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Term> for u64 {
    fn from(term: Term) -> Self {
        term.0
    }
}

/// Position of an entry within the replicated log.
///
/// Indices are one-based: the first entry ever appended has index 1. Index 0
/// denotes "no entry" (an empty log, or "before the first entry").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns `self - 1`, saturating at zero rather than underflowing.
    pub fn saturating_prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for u64 {
    fn from(index: LogIndex) -> Self {
        index.0
    }
}

/// Identifier for a cluster member (both voting and non-voting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(u64);

impl MemberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MemberId> for u64 {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

/// Identifier for a client session.
///
/// A session's id is the log index of the `Register` entry that created it,
/// so this is a transparent wrapper over [`LogIndex`] rather than a distinct
/// counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for SessionId {
    fn from(index: LogIndex) -> Self {
        Self(index.as_u64())
    }
}

impl From<SessionId> for LogIndex {
    fn from(id: SessionId) -> Self {
        LogIndex::new(id.as_u64())
    }
}

/// A per-session monotonic command or query sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestSeq(u64);

impl RequestSeq {
    pub const ZERO: RequestSeq = RequestSeq(0);

    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for RequestSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestSeq {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<RequestSeq> for u64 {
    fn from(seq: RequestSeq) -> Self {
        seq.0
    }
}

/// The apply-index at which an event was published; orders events across
/// commands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventVersion(u64);

impl EventVersion {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for EventVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for EventVersion {
    fn from(index: LogIndex) -> Self {
        Self(index.as_u64())
    }
}

/// Orders multiple events published at the same [`EventVersion`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventSequence(u64);

impl EventSequence {
    pub const ZERO: EventSequence = EventSequence(0);

    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for EventSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventSequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Timestamp — deterministic, committed-entry-driven clock
// ============================================================================

/// A logical millisecond timestamp.
///
/// Within apply paths this is driven strictly by committed entries (see
/// `DESIGN.md`'s deterministic-clock note); replication and timer paths may
/// populate it from the wall clock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the later of `self` and `other`.
    ///
    /// This is the advance rule for the deterministic apply-path clock:
    /// `clock = max(clock, entry.timestamp)`.
    pub fn advance(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.max(other.0))
    }

    pub fn elapsed_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Role
// ============================================================================

/// The role a server occupies in the consensus role state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    Passive,
    Reserve,
    Inactive,
}

impl Role {
    /// Stateful roles participate in replication and apply committed
    /// entries; `Inactive` is terminal and does neither.
    pub fn is_stateful(self) -> bool {
        !matches!(self, Role::Inactive)
    }

    /// Only `Active`-typed members in `Follower`/`Candidate`/`Leader`
    /// participate in quorum counting.
    pub fn is_voting(self) -> bool {
        matches!(self, Role::Follower | Role::Candidate | Role::Leader)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
            Role::Passive => "passive",
            Role::Reserve => "reserve",
            Role::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Membership
// ============================================================================

/// The classification of a member within a [`Configuration`].
///
/// `Active` members vote in elections and count toward quorum. `Passive`
/// members receive replication but do not vote. `Reserve` members are
/// tracked but receive no replication traffic until promoted. `Inactive`
/// members have been removed from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberType {
    Active,
    Passive,
    Reserve,
    Inactive,
}

impl Display for MemberType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemberType::Active => "active",
            MemberType::Passive => "passive",
            MemberType::Reserve => "reserve",
            MemberType::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

/// Availability as tracked by heartbeat apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Available,
    Unavailable,
}

/// A single member entry within a [`Configuration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub member_type: MemberType,
    pub server_address: String,
    pub client_address: String,
}

impl Member {
    pub fn new(
        id: MemberId,
        member_type: MemberType,
        server_address: impl Into<String>,
        client_address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            member_type,
            server_address: server_address.into(),
            client_address: client_address.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.member_type, MemberType::Active)
    }

    pub fn is_stateful(&self) -> bool {
        !matches!(self.member_type, MemberType::Inactive)
    }
}

/// A committed cluster membership snapshot.
///
/// `version` equals the log index of the `Configuration` entry that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub version: LogIndex,
    pub members: Vec<Member>,
}

impl Configuration {
    pub fn new(version: LogIndex, members: Vec<Member>) -> Self {
        Self { version, members }
    }

    pub fn empty() -> Self {
        Self {
            version: LogIndex::ZERO,
            members: Vec::new(),
        }
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_active())
    }

    pub fn stateful_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_stateful())
    }

    /// Size of the voting quorum: a strict majority of `Active` members.
    pub fn quorum_size(&self) -> usize {
        self.active_members().count() / 2 + 1
    }
}

// ============================================================================
// Consistency levels
// ============================================================================

/// Read consistency requested by a `Query` or granted to a `Command`'s event
/// delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Causal,
    Sequential,
    BoundedLinearizable,
    Linearizable,
}

impl ConsistencyLevel {
    pub fn requires_linearizable_events(self) -> bool {
        matches!(self, ConsistencyLevel::Linearizable)
    }
}

// ============================================================================
// Session state
// ============================================================================

/// The lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Open,
    Suspect,
    Unregistering,
    Closed,
    Expired,
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Status carried on every client-visible response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Error,
}

/// The error kinds a client-visible response may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ResponseError {
    #[error("no leader known for this cluster")]
    NoLeader,
    #[error("session is unknown or has expired")]
    UnknownSession,
    #[error("this member cannot serve the request in its current role")]
    IllegalMemberState,
    #[error("the state machine rejected the operation")]
    ApplicationError,
    #[error("internal server error")]
    InternalError,
    #[error("command could not be completed")]
    CommandError,
}

/// Errors surfaced across the three subsystem boundaries (log, consensus,
/// session). Fatal log-invariant violations are not represented here — they
/// are programming errors and `panic!` at the call site instead (see
/// [`ResponseError`] for the client-visible taxonomy).
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("not the leader; last known leader is {leader:?}")]
    NotLeader { leader: Option<MemberId> },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {0} is already closed")]
    SessionClosed(SessionId),

    #[error("member {0} cannot serve this request in its current role")]
    IllegalMemberState(MemberId),

    #[error("state machine rejected the operation: {0}")]
    ApplicationError(String),

    #[error("command could not be completed: {0}")]
    CommandError(String),

    #[error("log error: {0}")]
    Log(#[from] LogErrorKind),
}

/// Lightweight, `Copy`-able log error identifiers, kept distinct from
/// `raft-log`'s own richer `LogError` so `raft-types` has no dependency on
/// `raft-log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum LogErrorKind {
    #[error("segment rollover required")]
    RolloverRequired,
    #[error("requested index is not present in the log")]
    IndexNotFound,
    #[error("corrupt record detected during recovery")]
    Corrupt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_index_prev_saturates_at_zero() {
        assert_eq!(LogIndex::ZERO.saturating_prev(), LogIndex::ZERO);
        assert_eq!(LogIndex::new(5).saturating_prev(), LogIndex::new(4));
    }

    #[test]
    fn timestamp_advance_is_monotonic() {
        let clock = Timestamp::from_millis(10);
        assert_eq!(clock.advance(Timestamp::from_millis(5)), clock);
        assert_eq!(
            clock.advance(Timestamp::from_millis(20)),
            Timestamp::from_millis(20)
        );
    }

    #[test]
    fn quorum_size_counts_active_only() {
        let config = Configuration::new(
            LogIndex::new(1),
            vec![
                Member::new(MemberId::new(1), MemberType::Active, "a", "a"),
                Member::new(MemberId::new(2), MemberType::Active, "b", "b"),
                Member::new(MemberId::new(3), MemberType::Active, "c", "c"),
                Member::new(MemberId::new(4), MemberType::Passive, "d", "d"),
            ],
        );
        assert_eq!(config.quorum_size(), 2);
    }

    #[test]
    fn session_id_round_trips_through_log_index() {
        let index = LogIndex::new(42);
        let session: SessionId = index.into();
        assert_eq!(LogIndex::from(session), index);
    }
}
