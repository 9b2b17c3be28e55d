//! The session/linearizability layer: registration, command sequencing,
//! duplicate suppression, query consistency, keep-alives, and expiration.
//!
//! The user-supplied state machine is an external collaborator (see the
//! crate-level out-of-scope boundary): this module invokes it through a
//! caller-supplied closure and caches only the opaque result it returns.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use raft_types::{EventSequence, EventVersion, LogIndex, RequestSeq, SessionId, SessionState, Timestamp};

/// The result of invoking the state machine for one command, as cached for
/// at-most-once replay.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Applied(Bytes),
    Rejected(String),
}

/// An event published by the state machine while applying a command.
#[derive(Debug, Clone)]
pub struct Event {
    pub session: SessionId,
    pub version: EventVersion,
    pub sequence: EventSequence,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
struct CachedResponse {
    outcome: CommandOutcome,
    /// True until every event published while producing this response has
    /// been acknowledged. A linearizable-consistency command's result is
    /// not releasable to the client while this is true (§4.5).
    awaiting_event_ack: bool,
}

/// A command that was queued behind a sequence gap and has now been applied
/// as a direct result of the gap filling.
pub struct ReadyCommand {
    pub sequence: RequestSeq,
    pub outcome: CommandOutcome,
    pub events: Vec<Event>,
    pub awaiting_event_ack: bool,
}

/// A command or query that arrived out of order and is parked until its
/// predecessor resolves.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub sequence: RequestSeq,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct QueuedQuery {
    pub sequence: RequestSeq,
    pub version: u64,
    pub payload: Bytes,
}

/// The per-client session record (§3 Session).
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub client_id: String,
    pub timeout_ms: u64,
    pub last_timestamp: Timestamp,
    /// The next sequence number this session's command stream expects.
    pub next_sequence: RequestSeq,
    response_cache: BTreeMap<RequestSeq, CachedResponse>,
    pub event_version: EventVersion,
    pub event_sequence: EventSequence,
    queued_commands_by_seq: BTreeMap<RequestSeq, QueuedCommand>,
    queued_queries_by_seq: BTreeMap<RequestSeq, QueuedQuery>,
    queued_queries_by_version: BTreeMap<u64, Vec<QueuedQuery>>,
    pub state: SessionState,
    pub last_keep_alive_index: LogIndex,
    pub last_connect_index: LogIndex,
    pub last_connect_address: Option<String>,
}

impl Session {
    fn new(id: SessionId, client_id: String, timeout_ms: u64, timestamp: Timestamp) -> Self {
        Self {
            id,
            client_id,
            timeout_ms,
            last_timestamp: timestamp,
            next_sequence: RequestSeq::new(1),
            response_cache: BTreeMap::new(),
            event_version: EventVersion::new(0),
            event_sequence: EventSequence::ZERO,
            queued_commands_by_seq: BTreeMap::new(),
            queued_queries_by_seq: BTreeMap::new(),
            queued_queries_by_version: BTreeMap::new(),
            state: SessionState::Open,
            last_keep_alive_index: LogIndex::ZERO,
            last_connect_index: LogIndex::ZERO,
            last_connect_address: None,
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now.elapsed_since(self.last_timestamp) > self.timeout_ms
    }

    fn cache_response(&mut self, sequence: RequestSeq, outcome: CommandOutcome, awaiting_event_ack: bool) {
        self.response_cache.insert(
            sequence,
            CachedResponse {
                outcome,
                awaiting_event_ack,
            },
        );
        self.next_sequence = sequence.next();
    }

    fn cached(&self, sequence: RequestSeq) -> Option<&CachedResponse> {
        self.response_cache.get(&sequence)
    }

    /// Drains response-cache and acknowledged-event bookkeeping up to the
    /// acks carried by a `KeepAlive` entry (§4.5 Keep-alive). Returns the
    /// cached responses that were still withheld pending an event ack and
    /// are now releasable, so the caller can deliver them to the client.
    fn apply_keep_alive_acks(
        &mut self,
        command_seq_ack: RequestSeq,
        event_version_ack: u64,
    ) -> Vec<(RequestSeq, CommandOutcome)> {
        self.response_cache.retain(|&seq, _| seq > command_seq_ack);
        let mut released = Vec::new();
        if event_version_ack >= self.event_version.as_u64() {
            for (&seq, entry) in self.response_cache.iter_mut() {
                if entry.awaiting_event_ack {
                    entry.awaiting_event_ack = false;
                    released.push((seq, entry.outcome.clone()));
                }
            }
        }
        released
    }

    /// Assigns the next `(version, sequence)` pair for an event published
    /// while applying the command at `apply_index`. Events published by the
    /// same apply share a version and get successive sequences within it.
    fn take_event_sequence(&mut self, apply_index: LogIndex) -> (EventVersion, EventSequence) {
        let version = EventVersion::from(apply_index);
        if self.event_version == version {
            self.event_sequence = self.event_sequence.next();
        } else {
            self.event_version = version;
            self.event_sequence = EventSequence::ZERO;
        }
        (self.event_version, self.event_sequence)
    }
}

fn publish_events(
    session: &mut Session,
    id: SessionId,
    apply_index: LogIndex,
    raw_events: Vec<Bytes>,
) -> Vec<Event> {
    raw_events
        .into_iter()
        .map(|payload| {
            let (version, sequence) = session.take_event_sequence(apply_index);
            Event {
                session: id,
                version,
                sequence,
                payload,
            }
        })
        .collect()
}

/// Outcome of applying (or queueing) a `Command` entry.
pub enum CommandApplyResult {
    /// Served from cache — the user state machine was not invoked.
    Cached {
        outcome: CommandOutcome,
        awaiting_event_ack: bool,
    },
    /// Freshly applied this call. `ready` carries any commands that had
    /// arrived out of order and became applicable now that this command
    /// filled the sequence gap — each already applied and cached, in
    /// ascending sequence order.
    Applied {
        outcome: CommandOutcome,
        events: Vec<Event>,
        awaiting_event_ack: bool,
        ready: Vec<ReadyCommand>,
    },
    /// Arrived ahead of its predecessor; parked until the gap fills.
    Queued,
    Unknown,
}

/// Outcome of applying (or queueing) a `Query`.
pub enum QueryApplyResult {
    Applied(Bytes, u64),
    Queued,
    Unknown,
}

/// Owns every live [`Session`] plus the global apply-version watermark
/// queries are compared against.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    last_applied_version: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn last_applied_version(&self) -> u64 {
        self.last_applied_version
    }

    /// Creates a new session. `id` is the log index of the `Register`
    /// entry that produced it.
    pub fn register(&mut self, id: SessionId, client_id: String, timeout_ms: u64, timestamp: Timestamp) {
        self.sessions
            .insert(id, Session::new(id, client_id, timeout_ms, timestamp));
    }

    pub fn connect(&mut self, id: SessionId, at_index: LogIndex, address: String) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_connect_index = at_index;
            session.last_connect_address = Some(address);
        }
    }

    /// Applies a `Command` entry against `apply_fn`, the user state
    /// machine. Implements the duplicate/out-of-order/fresh dispatch of
    /// §4.5.
    pub fn apply_command(
        &mut self,
        id: SessionId,
        sequence: RequestSeq,
        timestamp: Timestamp,
        payload: &Bytes,
        linearizable: bool,
        apply_index: LogIndex,
        mut apply_fn: impl FnMut(&Bytes) -> (Result<Bytes, String>, Vec<Bytes>),
    ) -> CommandApplyResult {
        self.last_applied_version = apply_index.as_u64();
        let Some(session) = self.sessions.get_mut(&id) else {
            return CommandApplyResult::Unknown;
        };
        session.last_timestamp = session.last_timestamp.advance(timestamp);
        session.state = SessionState::Open;

        if sequence < session.next_sequence {
            return match session.cached(sequence) {
                Some(cached) => CommandApplyResult::Cached {
                    outcome: cached.outcome.clone(),
                    awaiting_event_ack: cached.awaiting_event_ack,
                },
                None => CommandApplyResult::Unknown,
            };
        }

        if sequence > session.next_sequence {
            session.queued_commands_by_seq.insert(
                sequence,
                QueuedCommand {
                    sequence,
                    timestamp,
                    payload: payload.clone(),
                },
            );
            return CommandApplyResult::Queued;
        }

        let (result, raw_events) = apply_fn(payload);
        let outcome = match result {
            Ok(bytes) => CommandOutcome::Applied(bytes),
            Err(reason) => CommandOutcome::Rejected(reason),
        };
        let events = publish_events(session, id, apply_index, raw_events);
        session.cache_response(sequence, outcome.clone(), linearizable);

        // A command that fills the sequence gap can make one or more
        // previously out-of-order commands applicable in turn; replay each
        // through the same apply path rather than discarding it, or it is
        // applied zero times instead of at-most-once (§4.5 property 2).
        let mut ready = Vec::new();
        loop {
            let next = session.next_sequence;
            let Some(queued) = session.queued_commands_by_seq.remove(&next) else {
                break;
            };
            let (queued_result, queued_raw_events) = apply_fn(&queued.payload);
            let queued_outcome = match queued_result {
                Ok(bytes) => CommandOutcome::Applied(bytes),
                Err(reason) => CommandOutcome::Rejected(reason),
            };
            let queued_events = publish_events(session, id, apply_index, queued_raw_events);
            session.cache_response(queued.sequence, queued_outcome.clone(), linearizable);
            ready.push(ReadyCommand {
                sequence: queued.sequence,
                outcome: queued_outcome,
                events: queued_events,
                awaiting_event_ack: linearizable,
            });
        }

        CommandApplyResult::Applied {
            outcome,
            events,
            awaiting_event_ack: linearizable,
            ready,
        }
    }

    /// Applies a `Query`. Consistency handling (`CAUSAL`/`SEQUENTIAL`/
    /// `BOUNDED_LINEARIZABLE`/`LINEARIZABLE`) is the caller's
    /// responsibility — this only resolves the ordering gate of §4.5.
    pub fn apply_query(
        &mut self,
        id: SessionId,
        sequence: RequestSeq,
        version: u64,
        payload: &Bytes,
        query_fn: impl FnOnce(&Bytes) -> Bytes,
    ) -> QueryApplyResult {
        let Some(session) = self.sessions.get_mut(&id) else {
            return QueryApplyResult::Unknown;
        };

        if sequence > session.next_sequence.saturating_prev_seq() {
            session.queued_queries_by_seq.insert(
                sequence,
                QueuedQuery {
                    sequence,
                    version,
                    payload: payload.clone(),
                },
            );
            return QueryApplyResult::Queued;
        }

        if version > self.last_applied_version {
            session
                .queued_queries_by_version
                .entry(version)
                .or_default()
                .push(QueuedQuery {
                    sequence,
                    version,
                    payload: payload.clone(),
                });
            return QueryApplyResult::Queued;
        }

        QueryApplyResult::Applied(query_fn(payload), self.last_applied_version)
    }

    /// Drains queries queued on `version` once the state machine advances
    /// past it.
    pub fn drain_queued_queries_by_version(&mut self, id: SessionId, version: u64) -> Vec<QueuedQuery> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Vec::new();
        };
        let ready_versions: Vec<u64> = session
            .queued_queries_by_version
            .range(..=version)
            .map(|(v, _)| *v)
            .collect();
        let mut drained = Vec::new();
        for v in ready_versions {
            if let Some(mut queries) = session.queued_queries_by_version.remove(&v) {
                drained.append(&mut queries);
            }
        }
        drained
    }

    /// Applies a `KeepAlive` entry: clears acknowledged cache entries and
    /// events, and marks the session trusted again. `at_index` is the
    /// entry's own log index, recorded so a later `KeepAlive` can clean its
    /// predecessor.
    pub fn apply_keep_alive(
        &mut self,
        id: SessionId,
        command_seq_ack: RequestSeq,
        event_version_ack: u64,
        timestamp: Timestamp,
        at_index: LogIndex,
    ) -> Vec<(RequestSeq, CommandOutcome)> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Vec::new();
        };
        session.last_timestamp = session.last_timestamp.advance(timestamp);
        let released = session.apply_keep_alive_acks(command_seq_ack, event_version_ack);
        session.state = SessionState::Open;
        session.last_keep_alive_index = at_index;
        released
    }

    /// Applies an `Unregister` entry, closing or expiring the session.
    pub fn apply_unregister(&mut self, id: SessionId, expired: bool) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = if expired {
                SessionState::Expired
            } else {
                SessionState::Closed
            };
        }
        self.sessions.remove(&id);
    }

    /// Advances the deterministic clock for suspect-detection as part of
    /// applying any timestamped entry, and returns sessions now eligible
    /// for the leader to expire. Only a leader should act on this list
    /// (§4.5 Session expiration).
    pub fn mark_suspects(&mut self, now: Timestamp) -> Vec<SessionId> {
        let mut suspects = Vec::new();
        for session in self.sessions.values_mut() {
            if session.state == SessionState::Open && session.is_expired_at(now) {
                session.state = SessionState::Suspect;
            }
            if session.state == SessionState::Suspect {
                suspects.push(session.id);
            }
        }
        suspects
    }
}

trait SaturatingPrevSeq {
    fn saturating_prev_seq(self) -> Self;
}

impl SaturatingPrevSeq for RequestSeq {
    fn saturating_prev_seq(self) -> Self {
        if self.as_u64() == 0 {
            self
        } else {
            RequestSeq::new(self.as_u64() - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_session() -> (SessionRegistry, SessionId) {
        let mut registry = SessionRegistry::new();
        let id = SessionId::new(3);
        registry.register(id, "client-x".into(), 5000, Timestamp::ZERO);
        (registry, id)
    }

    #[test]
    fn duplicate_command_is_served_from_cache_without_reinvoking_state_machine() {
        let (mut registry, id) = registry_with_session();
        let mut invocations = 0;
        let result = registry.apply_command(
            id,
            RequestSeq::new(1),
            Timestamp::from_millis(1),
            &Bytes::from_static(b"SET k v"),
            false,
            LogIndex::new(4),
            |_| {
                invocations += 1;
                (Ok(Bytes::from_static(b"ack1")), Vec::new())
            },
        );
        assert!(matches!(result, CommandApplyResult::Applied { .. }));

        let result = registry.apply_command(
            id,
            RequestSeq::new(1),
            Timestamp::from_millis(2),
            &Bytes::from_static(b"SET k v"),
            false,
            LogIndex::new(5),
            |_| {
                invocations += 1;
                (Ok(Bytes::from_static(b"ack1-again")), Vec::new())
            },
        );
        assert!(matches!(result, CommandApplyResult::Cached { .. }));
        assert_eq!(invocations, 1);
    }

    #[test]
    fn out_of_order_command_is_queued_not_applied() {
        let (mut registry, id) = registry_with_session();
        let mut invoked = false;
        let result = registry.apply_command(
            id,
            RequestSeq::new(2),
            Timestamp::ZERO,
            &Bytes::from_static(b"payload"),
            false,
            LogIndex::new(4),
            |_| {
                invoked = true;
                (Ok(Bytes::new()), Vec::new())
            },
        );
        assert!(matches!(result, CommandApplyResult::Queued));
        assert!(!invoked);
    }

    #[test]
    fn queued_command_is_replayed_once_the_gap_fills() {
        let (mut registry, id) = registry_with_session();
        let mut applied = Vec::new();

        let queued = registry.apply_command(
            id,
            RequestSeq::new(2),
            Timestamp::ZERO,
            &Bytes::from_static(b"second"),
            false,
            LogIndex::new(4),
            |p| {
                applied.push(p.clone());
                (Ok(p.clone()), Vec::new())
            },
        );
        assert!(matches!(queued, CommandApplyResult::Queued));
        assert!(applied.is_empty());

        let result = registry.apply_command(
            id,
            RequestSeq::new(1),
            Timestamp::ZERO,
            &Bytes::from_static(b"first"),
            false,
            LogIndex::new(5),
            |p| {
                applied.push(p.clone());
                (Ok(p.clone()), Vec::new())
            },
        );
        let CommandApplyResult::Applied { ready, .. } = result else {
            panic!("expected Applied");
        };
        assert_eq!(applied, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].sequence, RequestSeq::new(2));
        assert_eq!(registry.get(id).unwrap().next_sequence, RequestSeq::new(3));
    }

    #[test]
    fn unknown_session_command_reports_unknown() {
        let mut registry = SessionRegistry::new();
        let result = registry.apply_command(
            SessionId::new(99),
            RequestSeq::new(1),
            Timestamp::ZERO,
            &Bytes::new(),
            false,
            LogIndex::new(1),
            |_| (Ok(Bytes::new()), Vec::new()),
        );
        assert!(matches!(result, CommandApplyResult::Unknown));
    }

    #[test]
    fn keep_alive_clears_acknowledged_cache_entries() {
        let (mut registry, id) = registry_with_session();
        registry.apply_command(
            id,
            RequestSeq::new(1),
            Timestamp::ZERO,
            &Bytes::new(),
            false,
            LogIndex::new(4),
            |_| (Ok(Bytes::from_static(b"ack1")), Vec::new()),
        );
        registry.apply_keep_alive(id, RequestSeq::new(1), 0, Timestamp::from_millis(10), LogIndex::new(5));
        let session = registry.get(id).unwrap();
        assert!(session.response_cache.is_empty());
    }

    #[test]
    fn linearizable_command_is_withheld_until_keep_alive_acks_its_event() {
        let (mut registry, id) = registry_with_session();
        let result = registry.apply_command(
            id,
            RequestSeq::new(1),
            Timestamp::ZERO,
            &Bytes::new(),
            true,
            LogIndex::new(4),
            |_| (Ok(Bytes::from_static(b"ack1")), vec![Bytes::from_static(b"evt")]),
        );
        let CommandApplyResult::Applied { awaiting_event_ack, events, .. } = result else {
            panic!("expected Applied");
        };
        assert!(awaiting_event_ack);
        assert_eq!(events.len(), 1);

        let released = registry.apply_keep_alive(id, RequestSeq::new(0), 0, Timestamp::from_millis(1), LogIndex::new(5));
        assert!(released.is_empty(), "event version not yet acked");

        let released = registry.apply_keep_alive(id, RequestSeq::new(0), 4, Timestamp::from_millis(2), LogIndex::new(6));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, RequestSeq::new(1));
    }

    #[test]
    fn session_becomes_suspect_after_timeout_elapses() {
        let (mut registry, id) = registry_with_session();
        let suspects = registry.mark_suspects(Timestamp::from_millis(10_000));
        assert_eq!(suspects, vec![id]);
    }
}
