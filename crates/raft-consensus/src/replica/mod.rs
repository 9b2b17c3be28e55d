//! The server-side consensus role state machine.
//!
//! Modeled as a pure, deterministic core following the FCIS pattern: a
//! [`ReplicaState`] consumes a [`ReplicaEvent`] and returns new state plus a
//! [`ReplicaOutput`] bundle of messages and client-visible completions. No
//! I/O, no clocks, no randomness happen inside `process` itself — the
//! caller supplies wall-clock readings and RNG draws as part of the event
//! (election timeout jitter, tick timestamps) so the core stays testable
//! under deterministic simulation.
//!
//! # Role transitions
//!
//! ```text
//! Follower --election timeout, not voted--> Candidate
//! Candidate --quorum of votes at current term--> Leader
//! Candidate --higher term / valid leader AppendEntries--> Follower
//! Leader --higher term observed--> Follower
//! any stateful role --Configuration reclassifies this member--> Passive/Reserve/Inactive
//! ```

pub mod election;
pub mod follower;
pub mod membership;
pub mod replication;
pub mod session_apply;
pub mod state;

pub use state::ReplicaState;

use bytes::Bytes;
use raft_log::LogEntry;
use raft_types::{LogIndex, MemberId, RequestSeq, SessionId};

use crate::message::Message;
use crate::session::Event;

/// Output produced by processing one [`ReplicaEvent`].
///
/// The caller (the imperative shell owning the event loop) is responsible
/// for sending `messages`, appending `log_appends`, and resolving
/// `completions` back to whichever client connection is waiting.
#[derive(Debug, Default)]
pub struct ReplicaOutput {
    pub messages: Vec<Message>,
    pub log_appends: Vec<LogEntry>,
    pub events: Vec<Event>,
    pub committed_through: Option<LogIndex>,
    pub completions: Vec<ClientCompletion>,
}

impl ReplicaOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.log_appends.is_empty()
            && self.events.is_empty()
            && self.committed_through.is_none()
            && self.completions.is_empty()
    }

    pub fn merge(&mut self, mut other: ReplicaOutput) {
        self.messages.append(&mut other.messages);
        self.log_appends.append(&mut other.log_appends);
        self.events.append(&mut other.events);
        if other.committed_through.is_some() {
            self.committed_through = other.committed_through;
        }
        self.completions.append(&mut other.completions);
    }
}

/// A result ready to be delivered back to whichever client connection
/// submitted the originating request.
#[derive(Debug)]
pub enum ClientCompletion {
    Command {
        session: SessionId,
        sequence: RequestSeq,
        result: Result<Bytes, String>,
    },
    Query {
        session: SessionId,
        sequence: RequestSeq,
        result: Bytes,
        version: u64,
    },
    Register {
        session: SessionId,
    },
    Rejected {
        reason: crate::error::ConsensusError,
    },
}

/// Events that can trigger replica state transitions.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    Message(Message),
    Timeout(TimeoutKind),
    ClientCommand {
        session: SessionId,
        sequence: RequestSeq,
        payload: Bytes,
        consistency: raft_types::ConsistencyLevel,
        /// Whether this command removes state it previously contributed
        /// (e.g. a delete), set by the caller submitting the command — the
        /// core never inspects `payload` to infer it.
        tombstone: bool,
    },
    ClientQuery {
        session: SessionId,
        sequence: RequestSeq,
        version: u64,
        payload: Bytes,
        consistency: raft_types::ConsistencyLevel,
    },
    ClientRegister {
        client_id: String,
        timeout_ms: u64,
    },
    ClientKeepAlive {
        session: SessionId,
        command_seq_ack: RequestSeq,
        event_version_ack: u64,
    },
    ClientUnregister {
        session: SessionId,
    },
    ReconfigCommand(membership::ReconfigCommand),
    /// A periodic tick: advances timers and drives the leader's heartbeat
    /// and session-expiration checks.
    Tick { now_millis: u64 },
}

/// Types of timeouts that can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Election,
    Heartbeat,
    KeepAlive(MemberId),
}

pub(crate) fn msg_to(from: MemberId, to: MemberId, payload: crate::message::MessagePayload) -> Message {
    Message::targeted(from, to, payload)
}

pub(crate) fn msg_broadcast(from: MemberId, payload: crate::message::MessagePayload) -> Message {
    Message::broadcast(from, payload)
}
