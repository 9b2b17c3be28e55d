//! The core replica state machine: [`ReplicaState::process`] is the single
//! entry point, consuming one [`ReplicaEvent`] and returning the next state
//! plus a [`ReplicaOutput`].

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use raft_log::{EntryKind, LogEntry, SegmentSizing, SegmentedLog};
use raft_types::{
    Configuration, ConsistencyLevel, LogIndex, Member, MemberId, MemberType, RequestSeq, Role,
    SessionId, Term, Timestamp,
};
use tracing::{info, instrument, warn};

use crate::clock::DeterministicClock;
use crate::config::ClusterConfig;
use crate::error::ConsensusError;
use crate::message::{
    AppendEntriesRequest, HeartbeatRequest, Message, MessagePayload, PollRequest, PollResponse,
    PublishRequest, VoteRequest, VoteResponse,
};
use crate::replica::election::log_is_at_least_as_up_to_date;
use crate::replica::follower::handle_append_entries;
use crate::replica::membership::{apply_reconfig_command, rebalance, ReconfigCommand};
use crate::replica::replication::{commit_index_candidate, median_match_index, PeerReplicationState};
use crate::replica::session_apply::{apply_committed_entry, apply_query, StateMachine};
use crate::replica::{msg_broadcast, msg_to, ClientCompletion, ReplicaEvent, ReplicaOutput, TimeoutKind};
use crate::session::{Event, SessionRegistry};
use crate::vote_store::VoteStore;

/// The full state of one server in the cluster.
pub struct ReplicaState {
    pub id: MemberId,
    pub role: Role,
    pub term: Term,
    pub voted_for: Option<MemberId>,
    pub log: SegmentedLog,
    pub configuration: Configuration,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub global_index: LogIndex,
    pub snapshot_index: LogIndex,
    pub leader: Option<MemberId>,
    /// Leader-only: the index of this term's own `NoOp` entry. `commit_index`
    /// may not advance past a prior term's entries until this commits
    /// (leader-completeness, §4.4).
    leader_noop_index: Option<LogIndex>,
    peers: HashMap<MemberId, PeerReplicationState>,
    votes_received: HashSet<MemberId>,
    poll_accepted: HashSet<MemberId>,
    reconfig_pending: bool,
    next_member_id: u64,
    pub sessions: SessionRegistry,
    pub clock: DeterministicClock,
    /// Real wall-clock time, advanced only by `Tick`. Used to stamp newly
    /// created entries; `clock` (the deterministic apply-path clock) must
    /// never be used for that, or it would only ever observe the
    /// timestamps it produced itself and never advance from an external
    /// source (§4.5 session expiration depends on this distinction).
    pub wall_clock: Timestamp,
    /// Durable store for `(term, voted_for)`, written before a vote or
    /// candidacy commits this replica to anything (§4.4). `None` means the
    /// embedder hasn't attached one; votes then live in memory only.
    vote_store: Option<Box<dyn VoteStore>>,
    pub config: ClusterConfig,
    election_elapsed_ms: u64,
    heartbeat_elapsed_ms: u64,
    consecutive_quorum_misses: u32,
}

impl ReplicaState {
    pub fn new(id: MemberId, configuration: Configuration, config: ClusterConfig) -> Self {
        Self {
            id,
            role: Role::Follower,
            term: Term::ZERO,
            voted_for: None,
            log: SegmentedLog::new(SegmentSizing {
                max_size_bytes: config.max_segment_bytes,
                max_entries: config.max_segment_entries,
            }),
            configuration,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            global_index: LogIndex::ZERO,
            snapshot_index: LogIndex::ZERO,
            leader: None,
            leader_noop_index: None,
            peers: HashMap::new(),
            votes_received: HashSet::new(),
            poll_accepted: HashSet::new(),
            reconfig_pending: false,
            next_member_id: 1,
            sessions: SessionRegistry::new(),
            clock: DeterministicClock::new(),
            wall_clock: Timestamp::ZERO,
            vote_store: None,
            config,
            election_elapsed_ms: 0,
            heartbeat_elapsed_ms: 0,
            consecutive_quorum_misses: 0,
        }
    }

    /// Attaches a durable vote store. Without one, `voted_for` lives only
    /// in memory and does not survive a restart.
    pub fn with_vote_store(mut self, store: Box<dyn VoteStore>) -> Self {
        self.vote_store = Some(store);
        self
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader)
    }

    /// Persists `(term, voted_for)` before the caller commits to granting a
    /// vote or starting a candidacy. Returns `false` (withhold the vote) if
    /// a store is attached and the write fails; returns `true` if there is
    /// no store to write to.
    fn persist_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> bool {
        match self.vote_store.as_mut() {
            Some(store) => match store.persist_vote(term, voted_for) {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "failed to persist vote durably; withholding it");
                    false
                }
            },
            None => true,
        }
    }

    fn member_role(&self) -> Option<MemberType> {
        self.configuration.member(self.id).map(|m| m.member_type)
    }

    /// Processes one event, consuming `self` by value per the FCIS pattern
    /// (no interior mutability, no I/O inside this function).
    #[instrument(skip(self, event, state_machine), fields(id = %self.id, role = %self.role, term = %self.term))]
    pub fn process(
        mut self,
        event: ReplicaEvent,
        state_machine: &mut impl StateMachine,
    ) -> (Self, ReplicaOutput) {
        let mut output = ReplicaOutput::empty();
        match event {
            ReplicaEvent::Message(message) => self.on_message(message, &mut output),
            ReplicaEvent::Timeout(kind) => self.on_timeout(kind, &mut output),
            ReplicaEvent::Tick { now_millis } => self.on_tick(now_millis, &mut output, state_machine),
            ReplicaEvent::ClientCommand {
                session,
                sequence,
                payload,
                consistency,
                tombstone,
            } => self.on_client_command(session, sequence, payload, consistency, tombstone, &mut output),
            ReplicaEvent::ClientQuery {
                session,
                sequence,
                version,
                payload,
                consistency,
            } => self.on_client_query(session, sequence, version, payload, consistency, &mut output, state_machine),
            ReplicaEvent::ClientRegister { client_id, timeout_ms } => {
                self.on_client_register(client_id, timeout_ms, &mut output)
            }
            ReplicaEvent::ClientKeepAlive {
                session,
                command_seq_ack,
                event_version_ack,
            } => self.on_client_keep_alive(session, command_seq_ack, event_version_ack, &mut output),
            ReplicaEvent::ClientUnregister { session } => self.on_client_unregister(session, &mut output),
            ReplicaEvent::ReconfigCommand(command) => self.on_reconfig_command(command, &mut output),
        }
        if self.is_leader() {
            self.try_advance_commit_index();
        }
        self.apply_commits(&mut output, state_machine);
        (self, output)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    fn on_message(&mut self, message: Message, output: &mut ReplicaOutput) {
        let from = message.from;
        match message.payload {
            MessagePayload::VoteRequest(request) => self.on_vote_request(from, request, output),
            MessagePayload::VoteResponse(response) => self.on_vote_response(response, output),
            MessagePayload::PollRequest(request) => self.on_poll_request(from, request, output),
            MessagePayload::PollResponse(response) => self.on_poll_response(response, output),
            MessagePayload::AppendEntriesRequest(request) => {
                self.on_append_entries_request(from, request, output)
            }
            MessagePayload::AppendEntriesResponse(response) => {
                self.on_append_entries_response(response, output)
            }
            MessagePayload::HeartbeatRequest(request) => self.on_heartbeat_request(request),
            MessagePayload::ConfigureRequest(request) => {
                self.apply_configuration(request.configuration);
            }
            MessagePayload::InstallSnapshotRequest(_) | MessagePayload::InstallSnapshotResponse(_) => {
                // Snapshot installation wire handling is driven by the
                // embedding runtime's transfer loop; the core only needs
                // the resulting state (see `SnapshotStore`).
            }
        }
    }

    fn step_down_if_stale(&mut self, incoming_term: Term) -> bool {
        if incoming_term > self.term {
            info!(new_term = %incoming_term, "observed higher term, stepping down to follower");
            self.term = incoming_term;
            self.voted_for = None;
            self.role = Role::Follower;
            self.leader = None;
            self.votes_received.clear();
            self.election_elapsed_ms = 0;
            true
        } else {
            false
        }
    }

    fn on_vote_request(&mut self, from: MemberId, request: VoteRequest, output: &mut ReplicaOutput) {
        self.step_down_if_stale(request.term);
        let up_to_date = log_is_at_least_as_up_to_date(
            request.last_log_term,
            request.last_log_index,
            self.last_log_term(),
            self.log.last_index(),
        );
        let mut can_vote = request.term == self.term
            && up_to_date
            && (self.voted_for.is_none() || self.voted_for == Some(request.candidate_id));
        if can_vote && self.voted_for != Some(request.candidate_id) {
            can_vote = self.persist_vote(self.term, Some(request.candidate_id));
        }
        if can_vote {
            self.voted_for = Some(request.candidate_id);
        }
        output.messages.push(msg_to(
            self.id,
            from,
            MessagePayload::VoteResponse(VoteResponse {
                term: self.term,
                voter_id: self.id,
                granted: can_vote,
            }),
        ));
    }

    fn on_vote_response(&mut self, response: VoteResponse, output: &mut ReplicaOutput) {
        if self.step_down_if_stale(response.term) || !matches!(self.role, Role::Candidate) {
            return;
        }
        if response.term != self.term || !response.granted {
            return;
        }
        self.votes_received.insert(response.voter_id);
        if self.votes_received.len() >= self.configuration.quorum_size() {
            self.become_leader(output);
        }
    }

    fn on_poll_request(&mut self, from: MemberId, request: PollRequest, output: &mut ReplicaOutput) {
        let up_to_date = log_is_at_least_as_up_to_date(
            request.last_log_term,
            request.last_log_index,
            self.last_log_term(),
            self.log.last_index(),
        );
        let accept = request.term >= self.term && up_to_date;
        output.messages.push(msg_to(
            self.id,
            from,
            MessagePayload::PollResponse(PollResponse {
                term: self.term,
                voter_id: self.id,
                accepted: accept,
            }),
        ));
    }

    fn on_poll_response(&mut self, response: PollResponse, output: &mut ReplicaOutput) {
        if !matches!(self.role, Role::Follower) {
            return;
        }
        if response.accepted {
            self.poll_accepted.insert(response.voter_id);
        }
        if self.poll_accepted.len() >= self.configuration.quorum_size() {
            self.poll_accepted.clear();
            self.become_candidate(output);
        }
    }

    fn on_append_entries_request(
        &mut self,
        from: MemberId,
        request: AppendEntriesRequest,
        output: &mut ReplicaOutput,
    ) {
        self.step_down_if_stale(request.term);
        if request.term >= self.term {
            self.term = request.term;
            self.role = Role::Follower;
            self.leader = Some(from);
            self.election_elapsed_ms = 0;
        }
        let mut commit_index = self.commit_index;
        let response = handle_append_entries(&mut self.log, self.id, self.term, &request, &mut commit_index);
        self.commit_index = commit_index;
        self.global_index = self.global_index.max(request.global_index).min(self.commit_index);

        // §4.4: configuration entries take effect at append time, not
        // commit time, so a minority partition converges on the new
        // configuration as soon as it sees the entry rather than waiting
        // for a commit it may never observe locally.
        if response.success {
            if let Some(config) = request
                .entries
                .iter()
                .filter_map(|entry| entry.as_configuration())
                .max_by_key(|config| config.version)
            {
                if config.version > self.configuration.version {
                    self.apply_configuration(config.clone());
                }
            }
        }

        output.messages.push(msg_to(
            self.id,
            from,
            MessagePayload::AppendEntriesResponse(response),
        ));
    }

    fn on_append_entries_response(&mut self, response: crate::message::AppendEntriesResponse, output: &mut ReplicaOutput) {
        if self.step_down_if_stale(response.term) || !self.is_leader() {
            return;
        }
        let Some(peer) = self.peers.get_mut(&response.member_id) else {
            return;
        };
        if response.success {
            peer.on_append_success(response.log_index);
        } else {
            peer.on_append_rejected(response.log_index, self.log.first_index());
        }
        self.try_advance_commit_index();
        self.maybe_commit_rebalance(output);
    }

    fn on_heartbeat_request(&mut self, request: HeartbeatRequest) {
        // Logged by the leader as a `Heartbeat` entry and applied through
        // the normal commit path (§4.4); this handler only records the
        // availability signal's arrival for liveness purposes outside the
        // log (e.g. driving `failure_count`).
        if let Some(peer) = self.peers.get_mut(&request.member) {
            peer.failure_count = 0;
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn on_timeout(&mut self, kind: TimeoutKind, output: &mut ReplicaOutput) {
        match kind {
            TimeoutKind::Election => {
                if matches!(self.role, Role::Follower) && self.voted_for.is_none() {
                    self.broadcast_poll(output);
                }
            }
            TimeoutKind::Heartbeat => {
                if self.is_leader() {
                    self.broadcast_heartbeat(output);
                }
            }
            TimeoutKind::KeepAlive(_) => {}
        }
    }

    fn on_tick(&mut self, now_millis: u64, output: &mut ReplicaOutput, _state_machine: &mut impl StateMachine) {
        self.wall_clock = self.wall_clock.advance(Timestamp::from_millis(now_millis));
        self.election_elapsed_ms += 1;
        self.heartbeat_elapsed_ms += 1;

        if matches!(self.role, Role::Follower)
            && self.voted_for.is_none()
            && self.election_elapsed_ms >= self.config.election_timeout.as_millis() as u64
        {
            self.election_elapsed_ms = 0;
            self.broadcast_poll(output);
        }

        if self.is_leader() {
            if self.heartbeat_elapsed_ms >= self.config.heartbeat_interval.as_millis() as u64 {
                self.heartbeat_elapsed_ms = 0;
                self.broadcast_heartbeat(output);

                if self.has_quorum_contact() {
                    self.consecutive_quorum_misses = 0;
                } else {
                    self.consecutive_quorum_misses += 1;
                }
                let heartbeats_per_timeout = (self.config.election_timeout.as_millis()
                    / self.config.heartbeat_interval.as_millis().max(1))
                .max(1) as u32;
                if self.consecutive_quorum_misses >= heartbeats_per_timeout * self.config.leader_step_down_timeouts {
                    warn!("leader lost quorum contact, stepping down");
                    self.role = Role::Follower;
                    self.leader = None;
                    self.consecutive_quorum_misses = 0;
                }
            }
            self.maybe_commit_rebalance(output);
        }
    }

    /// Whether at least a quorum of active members (including this leader)
    /// have responded within their current replication window.
    fn has_quorum_contact(&self) -> bool {
        let reachable = self
            .configuration
            .active_members()
            .filter(|m| m.id == self.id || self.peers.get(&m.id).map(|p| p.failure_count == 0).unwrap_or(false))
            .count();
        reachable >= self.configuration.quorum_size()
    }

    fn broadcast_poll(&mut self, output: &mut ReplicaOutput) {
        self.poll_accepted.clear();
        self.poll_accepted.insert(self.id);
        if self.poll_accepted.len() >= self.configuration.quorum_size() {
            self.poll_accepted.clear();
            self.become_candidate(output);
            return;
        }
        output.messages.push(msg_broadcast(
            self.id,
            MessagePayload::PollRequest(PollRequest {
                term: self.term,
                candidate_id: self.id,
                last_log_index: self.log.last_index(),
                last_log_term: self.last_log_term(),
            }),
        ));
    }

    fn become_candidate(&mut self, output: &mut ReplicaOutput) {
        let new_term = self.term.next();
        if !self.persist_vote(new_term, Some(self.id)) {
            return;
        }
        self.role = Role::Candidate;
        self.term = new_term;
        self.voted_for = Some(self.id);
        self.votes_received.clear();
        self.votes_received.insert(self.id);
        self.election_elapsed_ms = 0;

        if self.configuration.quorum_size() <= 1 {
            self.become_leader(output);
            return;
        }

        output.messages.push(msg_broadcast(
            self.id,
            MessagePayload::VoteRequest(VoteRequest {
                term: self.term,
                candidate_id: self.id,
                last_log_index: self.log.last_index(),
                last_log_term: self.last_log_term(),
            }),
        ));
    }

    fn become_leader(&mut self, output: &mut ReplicaOutput) {
        info!("elected leader");
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.peers.clear();
        for member in self.configuration.stateful_members() {
            if member.id == self.id {
                continue;
            }
            self.peers
                .insert(member.id, PeerReplicationState::new(member.id, self.log.last_index().next()));
        }

        let noop_index = self.log.last_index().next();
        let noop = LogEntry::new(
            noop_index,
            self.term,
            EntryKind::NoOp {
                timestamp: self.wall_clock,
            },
        );
        self.log.append(noop.clone());
        output.log_appends.push(noop);
        self.leader_noop_index = Some(noop_index);

        let config_index = self.log.last_index().next();
        let mut configuration = self.configuration.clone();
        configuration.version = config_index;
        let config_entry = LogEntry::new(config_index, self.term, EntryKind::Configuration(configuration));
        self.log.append(config_entry.clone());
        output.log_appends.push(config_entry);

        self.replicate_to_all(output);
    }

    fn last_log_term(&self) -> Term {
        self.log.get(self.log.last_index()).map(|e| e.term).unwrap_or(Term::ZERO)
    }

    fn broadcast_heartbeat(&mut self, output: &mut ReplicaOutput) {
        self.replicate_to_all(output);
    }

    fn replicate_to_all(&mut self, output: &mut ReplicaOutput) {
        let member_ids: Vec<MemberId> = self.peers.keys().copied().collect();
        for member_id in member_ids {
            self.replicate_to_peer(member_id, output);
        }
    }

    fn replicate_to_peer(&mut self, member_id: MemberId, output: &mut ReplicaOutput) {
        let Some(peer) = self.peers.get(&member_id) else {
            return;
        };
        let next_index = peer.next_index;
        let prev_index = next_index.saturating_prev();
        let prev_term = self.log.get(prev_index).map(|e| e.term).unwrap_or(Term::ZERO);

        let mut entries = Vec::new();
        let mut batch_bytes = 0u64;
        let mut cursor = next_index;
        while cursor <= self.log.last_index() {
            if let Some(entry) = self.log.get(cursor) {
                let size = raft_log::segment::entry_wire_size(entry);
                if !entries.is_empty() && batch_bytes + size > self.config.max_batch_bytes {
                    break;
                }
                batch_bytes += size;
                entries.push(entry.clone());
            }
            cursor = cursor.next();
        }

        output.messages.push(msg_to(
            self.id,
            member_id,
            MessagePayload::AppendEntriesRequest(AppendEntriesRequest {
                term: self.term,
                leader_id: self.id,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries,
                commit_index: self.commit_index,
                global_index: self.global_index,
            }),
        ));
    }

    fn try_advance_commit_index(&mut self) {
        let Some(noop_index) = self.leader_noop_index else {
            return;
        };
        let voting: Vec<MemberId> = self
            .configuration
            .active_members()
            .map(|m| m.id)
            .collect();
        let median = median_match_index(&self.peers, &voting, self.log.last_index());
        if let Some(candidate) = commit_index_candidate(median, noop_index) {
            if candidate > self.commit_index {
                self.commit_index = candidate;
            }
        }
        self.global_index = self
            .configuration
            .stateful_members()
            .map(|m| {
                if m.id == self.id {
                    self.log.last_index()
                } else {
                    self.peers.get(&m.id).map(|p| p.match_index).unwrap_or(LogIndex::ZERO)
                }
            })
            .min()
            .unwrap_or(LogIndex::ZERO);
    }

    // ------------------------------------------------------------------
    // Apply loop
    // ------------------------------------------------------------------

    fn apply_commits(&mut self, output: &mut ReplicaOutput, state_machine: &mut impl StateMachine) {
        while self.last_applied < self.commit_index {
            let next = self.last_applied.next();
            let Some(entry) = self.log.get(next).cloned() else {
                break;
            };
            let apply_output = apply_committed_entry(&entry, self.is_leader(), &mut self.sessions, &mut self.clock, state_machine);
            output.completions.extend(apply_output.completions);
            if self.is_leader() {
                self.publish_events(apply_output.events, output);
            } else {
                output.events.extend(apply_output.events);
            }
            self.log.clean(next);

            if let Some(config) = entry.as_configuration().cloned() {
                self.reconfig_pending = false;
                // Usually already applied at append time (§4.4); this
                // guards the case where commit lands the entry before this
                // replica ever saw it as an append (e.g. via snapshot).
                if config.version > self.configuration.version {
                    self.apply_configuration(config);
                }
            }
            if self.is_leader() {
                self.expire_suspects(apply_output.expired_sessions, output);
                self.maybe_commit_rebalance(output);
            }

            self.last_applied = next;
        }
        output.committed_through = Some(self.commit_index);
    }

    /// Pushes each event to `ReplicaOutput.events` and, where the owning
    /// session's current connection resolves to a known member, also emits
    /// a `PublishRequest` so that member can deliver it to its client
    /// (§4.5). A session with no recorded connection only gets the
    /// `events` entry; delivery then waits for the next `Connect`.
    fn publish_events(&mut self, events: Vec<Event>, output: &mut ReplicaOutput) {
        for event in events {
            let address = self
                .sessions
                .get(event.session)
                .and_then(|s| s.last_connect_address.clone());
            if let Some(address) = address {
                if let Some(member) = self.configuration.active_members().find(|m| m.server_address == address) {
                    output.messages.push(msg_to(
                        self.id,
                        member.id,
                        MessagePayload::PublishRequest(PublishRequest {
                            session: event.session,
                            event_version: event.version.as_u64(),
                            event_sequence: event.sequence.as_u64(),
                            payload: event.payload.clone(),
                        }),
                    ));
                }
            }
            output.events.push(event);
        }
    }

    fn expire_suspects(&mut self, suspects: Vec<SessionId>, output: &mut ReplicaOutput) {
        for session in suspects {
            let index = self.log.last_index().next();
            let entry = LogEntry::new(
                index,
                self.term,
                EntryKind::Unregister {
                    session,
                    expired: true,
                    timestamp: self.wall_clock,
                },
            );
            self.log.append(entry.clone());
            output.log_appends.push(entry);
        }
        self.replicate_to_all(output);
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    fn apply_configuration(&mut self, configuration: Configuration) {
        self.configuration = configuration;
        if let Some(member_type) = self.member_role() {
            if matches!(member_type, MemberType::Inactive) {
                self.role = Role::Inactive;
            } else if !self.is_leader() {
                self.role = match member_type {
                    MemberType::Active => Role::Follower,
                    MemberType::Passive => Role::Passive,
                    MemberType::Reserve => Role::Reserve,
                    MemberType::Inactive => Role::Inactive,
                };
            }
        }
    }

    fn on_reconfig_command(&mut self, command: ReconfigCommand, output: &mut ReplicaOutput) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        if self.leader_noop_index.map(|i| i > self.commit_index).unwrap_or(true) {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::ReconfigurationInProgress,
            });
            return;
        }
        if self.reconfig_pending {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::ReconfigurationInProgress,
            });
            return;
        }

        let next_member_id = MemberId::new(self.next_member_id);
        self.next_member_id += 1;
        let index = self.log.last_index().next();
        let configuration = apply_reconfig_command(&self.configuration, &command, next_member_id, index);
        self.configuration = configuration.clone();
        self.reconfig_pending = true;
        let entry = LogEntry::new(index, self.term, EntryKind::Configuration(configuration));
        self.log.append(entry.clone());
        output.log_appends.push(entry);
        for member in self.configuration.stateful_members() {
            if member.id != self.id && !self.peers.contains_key(&member.id) {
                self.peers
                    .insert(member.id, PeerReplicationState::new(member.id, self.log.last_index()));
            }
        }
        self.replicate_to_all(output);
    }

    fn maybe_commit_rebalance(&mut self, output: &mut ReplicaOutput) {
        if !self.is_leader() || self.reconfig_pending {
            return;
        }
        let peers = &self.peers;
        if let Some(next_configuration) = rebalance(&self.configuration, |id| {
            peers.get(&id).map(|p| p.failure_count == 0).unwrap_or(true)
        }) {
            let index = self.log.last_index().next();
            let mut configuration = next_configuration;
            configuration.version = index;
            self.configuration = configuration.clone();
            self.reconfig_pending = true;
            let entry = LogEntry::new(index, self.term, EntryKind::Configuration(configuration));
            self.log.append(entry.clone());
            output.log_appends.push(entry);
            self.replicate_to_all(output);
        }
    }

    // ------------------------------------------------------------------
    // Client-facing requests
    // ------------------------------------------------------------------

    fn on_client_register(&mut self, client_id: String, timeout_ms: u64, output: &mut ReplicaOutput) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        let timeout_ms = if timeout_ms == 0 {
            self.config.default_session_timeout.as_millis() as u64
        } else {
            timeout_ms
        };
        let index = self.log.last_index().next();
        let entry = LogEntry::new(
            index,
            self.term,
            EntryKind::Register {
                client_id,
                timestamp: self.wall_clock,
                timeout_ms,
            },
        );
        self.log.append(entry.clone());
        output.log_appends.push(entry);
        self.replicate_to_all(output);
    }

    fn on_client_command(
        &mut self,
        session: SessionId,
        sequence: RequestSeq,
        payload: Bytes,
        consistency: ConsistencyLevel,
        tombstone: bool,
        output: &mut ReplicaOutput,
    ) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        let index = self.log.last_index().next();
        let entry = LogEntry::new(
            index,
            self.term,
            EntryKind::Command {
                session,
                sequence,
                timestamp: self.wall_clock,
                payload,
                consistency,
                tombstone,
            },
        );
        self.log.append(entry.clone());
        output.log_appends.push(entry);
        self.replicate_to_all(output);
    }

    fn on_client_query(
        &mut self,
        session: SessionId,
        sequence: RequestSeq,
        version: u64,
        payload: Bytes,
        consistency: ConsistencyLevel,
        output: &mut ReplicaOutput,
        state_machine: &mut impl StateMachine,
    ) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        // A full linearizable round additionally requires a
        // majority-acknowledged heartbeat before applying; the embedding
        // runtime drives that round and resubmits the query once it
        // completes, so by the time it reaches here it is cleared to read.
        if let Some(completion) = apply_query(
            session,
            sequence,
            version,
            &payload,
            consistency,
            &mut self.sessions,
            state_machine,
        ) {
            output.completions.push(completion);
        }
    }

    fn on_client_keep_alive(
        &mut self,
        session: SessionId,
        command_seq_ack: RequestSeq,
        event_version_ack: u64,
        output: &mut ReplicaOutput,
    ) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        if let Some(previous) = self.sessions.get(session).map(|s| s.last_keep_alive_index) {
            if !previous.is_zero() {
                self.log.clean(previous);
            }
        }
        let index = self.log.last_index().next();
        let entry = LogEntry::new(
            index,
            self.term,
            EntryKind::KeepAlive {
                session,
                command_seq_ack,
                event_version_ack,
                timestamp: self.wall_clock,
            },
        );
        self.log.append(entry.clone());
        output.log_appends.push(entry);
        self.replicate_to_all(output);
    }

    fn on_client_unregister(&mut self, session: SessionId, output: &mut ReplicaOutput) {
        if !self.is_leader() {
            output.completions.push(ClientCompletion::Rejected {
                reason: ConsensusError::NotLeader { leader: self.leader },
            });
            return;
        }
        let index = self.log.last_index().next();
        let entry = LogEntry::new(
            index,
            self.term,
            EntryKind::Unregister {
                session,
                expired: false,
                timestamp: self.wall_clock,
            },
        );
        self.log.append(entry.clone());
        output.log_appends.push(entry);
        self.replicate_to_all(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoStateMachine;

    impl StateMachine for EchoStateMachine {
        fn apply(&mut self, payload: &Bytes) -> Result<Bytes, String> {
            Ok(payload.clone())
        }
        fn query(&self, payload: &Bytes) -> Bytes {
            payload.clone()
        }
    }

    fn single_member_configuration(id: MemberId) -> Configuration {
        Configuration::new(
            LogIndex::ZERO,
            vec![Member::new(id, MemberType::Active, "a", "a")],
        )
    }

    #[test]
    fn single_member_cluster_becomes_leader_immediately() {
        let id = MemberId::new(1);
        let mut state = ReplicaState::new(id, single_member_configuration(id), ClusterConfig::default());
        let mut sm = EchoStateMachine;
        let mut output = ReplicaOutput::empty();
        state.become_candidate(&mut output);
        assert!(state.is_leader());
        let _ = &mut sm;
    }

    #[test]
    fn register_then_command_assigns_session_and_caches_response() {
        let id = MemberId::new(1);
        let mut state = ReplicaState::new(id, single_member_configuration(id), ClusterConfig::default());
        let mut output = ReplicaOutput::empty();
        state.become_candidate(&mut output);
        let mut sm = EchoStateMachine;

        let (mut state, _out) = state.process(
            ReplicaEvent::ClientRegister {
                client_id: "client-x".into(),
                timeout_ms: 5000,
            },
            &mut sm,
        );
        let session_index = state.log.last_index();
        let session_id: SessionId = session_index.into();

        let (state2, out2) = state.process(
            ReplicaEvent::ClientCommand {
                session: session_id,
                sequence: RequestSeq::new(1),
                payload: Bytes::from_static(b"SET k v"),
                consistency: ConsistencyLevel::Sequential,
                tombstone: false,
            },
            &mut sm,
        );
        state = state2;
        assert!(out2
            .completions
            .iter()
            .any(|c| matches!(c, ClientCompletion::Command { .. })));
        assert!(state.sessions.get(session_id).is_some());
    }
}
