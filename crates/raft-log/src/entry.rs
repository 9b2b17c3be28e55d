//! Log entry types.
//!
//! Every entry shares a header of `(index, term)`. The payload is one of the
//! tagged variants below. Each variant declares, via [`LogEntry::is_tombstone`]
//! and [`LogEntry::is_snapshottable`], how compaction is allowed to treat it.

use raft_types::{ConsistencyLevel, LogIndex, MemberId, SessionId, Term, Timestamp};
use serde::{Deserialize, Serialize};

use raft_types::{Configuration, RequestSeq};

/// The payload carried by a log entry.
///
/// `Query` is never appended to the log (see the doc comment on
/// [`EntryKind::Query`]) — it is included here only so the apply path can
/// share dispatch code with `Command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Committed once per term by a newly elected leader; resets timers and
    /// allows prior terms to become commit-eligible.
    NoOp { timestamp: Timestamp },

    /// A cluster membership snapshot. `version` mirrors the entry's own
    /// index.
    Configuration(Configuration),

    /// Session birth. The entry's own index becomes the session id.
    Register {
        client_id: String,
        timestamp: Timestamp,
        timeout_ms: u64,
    },

    /// Pins a session to a server address (for event delivery routing).
    Connect {
        session: SessionId,
        address: String,
        timestamp: Timestamp,
    },

    /// Session liveness refresh plus response-cache/event acknowledgements.
    KeepAlive {
        session: SessionId,
        command_seq_ack: RequestSeq,
        event_version_ack: u64,
        timestamp: Timestamp,
    },

    /// Session death, either client-requested or leader-driven expiration.
    Unregister {
        session: SessionId,
        expired: bool,
        timestamp: Timestamp,
    },

    /// A state-changing operation submitted by a session.
    ///
    /// Whether a given command removes state it previously contributed
    /// (and is therefore compaction-eligible as a tombstone only once
    /// `major_compact_index` passes it) is a property of what the command
    /// *does*, not of the `Command` variant itself — a `SET` and a
    /// `DELETE` share this variant but differ in `tombstone`. The
    /// state-machine-defined payload is opaque to this crate; the
    /// embedder sets `tombstone` when constructing the entry.
    Command {
        session: SessionId,
        sequence: RequestSeq,
        timestamp: Timestamp,
        payload: bytes::Bytes,
        consistency: ConsistencyLevel,
        tombstone: bool,
    },

    /// A read-only operation. **Never logged** — queries are materialized
    /// directly against applied state and exist as an `EntryKind` variant
    /// only so session-apply dispatch can share one match arm with
    /// `Command`.
    Query {
        session: SessionId,
        sequence: RequestSeq,
        version: u64,
        timestamp: Timestamp,
        payload: bytes::Bytes,
        consistency: ConsistencyLevel,
    },

    /// A member's periodic availability signal, carrying its local commit
    /// index.
    Heartbeat {
        member: MemberId,
        commit_index: LogIndex,
        timestamp: Timestamp,
    },
}

impl EntryKind {
    /// A numeric tag identifying the variant on the wire (see
    /// `crate::codec`). Stable across versions: never renumber an existing
    /// variant.
    pub fn type_id(&self) -> u16 {
        match self {
            EntryKind::NoOp { .. } => 0,
            EntryKind::Configuration(_) => 1,
            EntryKind::Register { .. } => 2,
            EntryKind::Connect { .. } => 3,
            EntryKind::KeepAlive { .. } => 4,
            EntryKind::Unregister { .. } => 5,
            EntryKind::Command { .. } => 6,
            EntryKind::Query { .. } => 7,
            EntryKind::Heartbeat { .. } => 8,
        }
    }

    /// True if this entry's semantic effect is to remove state contributed
    /// by a prior entry. Tombstones may be discarded during compaction only
    /// once their index is at or below the major-compact index.
    ///
    /// `Unregister` is always a tombstone (session teardown always removes
    /// state). `Command` carries its own `tombstone` flag, since the same
    /// variant covers both state-introducing and state-removing operations.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, EntryKind::Command { tombstone: true, .. } | EntryKind::Unregister { .. })
    }

    /// True if this entry's contribution to state is fully captured by any
    /// snapshot taken at or after its index, and it may be discarded
    /// unconditionally once the snapshot index passes it.
    pub fn is_snapshottable(&self) -> bool {
        matches!(
            self,
            EntryKind::Command { .. }
                | EntryKind::Register { .. }
                | EntryKind::Connect { .. }
                | EntryKind::KeepAlive { .. }
                | EntryKind::Unregister { .. }
                | EntryKind::Heartbeat { .. }
        )
    }

    /// The entry's timestamp, where it carries one. `NoOp`, `Configuration`
    /// and `Query`/non-timestamped variants return `None` (`Configuration`
    /// carries no timestamp of its own).
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            EntryKind::NoOp { timestamp }
            | EntryKind::Connect { timestamp, .. }
            | EntryKind::KeepAlive { timestamp, .. }
            | EntryKind::Unregister { timestamp, .. }
            | EntryKind::Command { timestamp, .. }
            | EntryKind::Query { timestamp, .. }
            | EntryKind::Heartbeat { timestamp, .. }
            | EntryKind::Register { timestamp, .. } => Some(*timestamp),
            EntryKind::Configuration(_) => None,
        }
    }
}

/// A single entry in the replicated log: the `(index, term)` header plus its
/// [`EntryKind`] payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub kind: EntryKind,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, kind: EntryKind) -> Self {
        Self { index, term, kind }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind.is_tombstone()
    }

    pub fn is_snapshottable(&self) -> bool {
        self.kind.is_snapshottable()
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, EntryKind::Configuration(_))
    }

    pub fn as_configuration(&self) -> Option<&Configuration> {
        match &self.kind {
            EntryKind::Configuration(config) => Some(config),
            _ => None,
        }
    }
}
