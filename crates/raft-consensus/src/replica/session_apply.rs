//! Dispatches committed log entries into the session layer, advancing the
//! deterministic clock and invoking the user state machine.
//!
//! The user state machine is an external collaborator (out of scope per the
//! crate's boundary): this module only knows it as a [`StateMachine`] trait
//! the embedder implements, invoked through `apply`/`query` and treated as
//! an opaque result producer.

use bytes::Bytes;
use raft_log::{EntryKind, LogEntry};
use raft_types::{ConsistencyLevel, LogIndex, MemberId, SessionId};

use crate::clock::DeterministicClock;
use crate::replica::ClientCompletion;
use crate::session::{CommandApplyResult, CommandOutcome, Event, QueryApplyResult, SessionRegistry};

/// The deterministic, caller-supplied state machine the session layer
/// applies committed commands and queries against.
pub trait StateMachine {
    fn apply(&mut self, payload: &Bytes) -> Result<Bytes, String>;
    fn query(&self, payload: &Bytes) -> Bytes;

    /// Events published while the most recent `apply` ran, in publish
    /// order. Drained once per apply; the default is the common case of a
    /// state machine that never publishes events.
    fn take_events(&mut self) -> Vec<Bytes> {
        Vec::new()
    }
}

/// Result of dispatching one committed entry through the session layer.
#[derive(Debug, Default)]
pub struct SessionApplyOutput {
    pub completions: Vec<ClientCompletion>,
    pub events: Vec<Event>,
    pub expired_sessions: Vec<SessionId>,
    pub member_status_update: Option<(MemberId, LogIndex)>,
}

/// Applies one committed [`LogEntry`] to the session registry and state
/// machine, in strict ascending index order (§5 ordering guarantee).
pub fn apply_committed_entry(
    entry: &LogEntry,
    is_leader: bool,
    sessions: &mut SessionRegistry,
    clock: &mut DeterministicClock,
    state_machine: &mut impl StateMachine,
) -> SessionApplyOutput {
    let mut output = SessionApplyOutput::default();

    if let Some(timestamp) = entry.kind.timestamp() {
        clock.observe(timestamp);
    }

    match &entry.kind {
        EntryKind::NoOp { .. } | EntryKind::Configuration(_) => {}

        EntryKind::Register {
            client_id,
            timestamp,
            timeout_ms,
        } => {
            let session_id: SessionId = entry.index.into();
            sessions.register(session_id, client_id.clone(), *timeout_ms, *timestamp);
            output.completions.push(ClientCompletion::Register { session: session_id });
        }

        EntryKind::Connect { session, address, .. } => {
            sessions.connect(*session, entry.index, address.clone());
        }

        EntryKind::KeepAlive {
            session,
            command_seq_ack,
            event_version_ack,
            timestamp,
        } => {
            let released = sessions.apply_keep_alive(
                *session,
                *command_seq_ack,
                *event_version_ack,
                *timestamp,
                entry.index,
            );
            for (sequence, outcome) in released {
                output.completions.push(ClientCompletion::Command {
                    session: *session,
                    sequence,
                    result: outcome_to_result(outcome),
                });
            }
        }

        EntryKind::Unregister { session, expired, .. } => {
            sessions.apply_unregister(*session, *expired);
        }

        EntryKind::Command {
            session,
            sequence,
            timestamp,
            payload,
            consistency,
            ..
        } => {
            let linearizable = consistency.requires_linearizable_events();
            let result = sessions.apply_command(
                *session,
                *sequence,
                *timestamp,
                payload,
                linearizable,
                entry.index,
                |p| {
                    let applied = state_machine.apply(p);
                    let events = state_machine.take_events();
                    (applied, events)
                },
            );
            dispatch_command_result(*session, *sequence, result, &mut output);
        }

        EntryKind::Query { .. } => {
            // Never logged (§3); dispatched directly by the consistency
            // layer instead of through committed-entry apply.
        }

        EntryKind::Heartbeat {
            member,
            commit_index,
            ..
        } => {
            output.member_status_update = Some((*member, *commit_index));
        }
    }

    if is_leader {
        output.expired_sessions = sessions.mark_suspects(clock.now());
    }

    output
}

fn outcome_to_result(outcome: CommandOutcome) -> Result<Bytes, String> {
    match outcome {
        CommandOutcome::Applied(bytes) => Ok(bytes),
        CommandOutcome::Rejected(reason) => Err(reason),
    }
}

/// Turns one `apply_command` result into completions and published events,
/// withholding a completion whose command is still awaiting its event ack
/// (§4.5) — that completion is released later, from the `KeepAlive` arm
/// above, once the ack arrives.
fn dispatch_command_result(
    session: SessionId,
    sequence: raft_types::RequestSeq,
    result: CommandApplyResult,
    output: &mut SessionApplyOutput,
) {
    match result {
        CommandApplyResult::Applied {
            outcome,
            events,
            awaiting_event_ack,
            ready,
        } => {
            output.events.extend(events);
            if !awaiting_event_ack {
                output.completions.push(ClientCompletion::Command {
                    session,
                    sequence,
                    result: outcome_to_result(outcome),
                });
            }
            for queued in ready {
                output.events.extend(queued.events);
                if !queued.awaiting_event_ack {
                    output.completions.push(ClientCompletion::Command {
                        session,
                        sequence: queued.sequence,
                        result: outcome_to_result(queued.outcome),
                    });
                }
            }
        }
        CommandApplyResult::Cached {
            outcome,
            awaiting_event_ack,
        } => {
            if !awaiting_event_ack {
                output.completions.push(ClientCompletion::Command {
                    session,
                    sequence,
                    result: outcome_to_result(outcome),
                });
            }
        }
        CommandApplyResult::Queued | CommandApplyResult::Unknown => {}
    }
}

/// Resolves a read-only `Query` directly against applied state, per the
/// consistency level requested (§4.5).
pub fn apply_query(
    session: SessionId,
    sequence: raft_types::RequestSeq,
    version: u64,
    payload: &Bytes,
    consistency: ConsistencyLevel,
    sessions: &mut SessionRegistry,
    state_machine: &impl StateMachine,
) -> Option<ClientCompletion> {
    let effective_version = match consistency {
        ConsistencyLevel::Causal => sessions.last_applied_version(),
        ConsistencyLevel::Sequential => version.max(sessions.last_applied_version()),
        // Bounded-linearizable/linearizable gating (majority contact,
        // no-op rounds) happens in the leader's replication path before
        // this function is reached; by the time we are here the read is
        // cleared to run locally.
        ConsistencyLevel::BoundedLinearizable | ConsistencyLevel::Linearizable => version,
    };

    match sessions.apply_query(session, sequence, effective_version, payload, |p| state_machine.query(p)) {
        QueryApplyResult::Applied(result, applied_version) => Some(ClientCompletion::Query {
            session,
            sequence,
            result,
            version: applied_version,
        }),
        QueryApplyResult::Queued | QueryApplyResult::Unknown => None,
    }
}
