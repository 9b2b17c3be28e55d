//! Leader-side replication: per-peer progress tracking, `AppendEntries`
//! response handling, and commit-index advancement by median match-index.

use raft_types::{LogIndex, MemberId};
use std::collections::HashMap;

/// Per-peer replication state maintained by the leader (§3).
#[derive(Debug, Clone)]
pub struct PeerReplicationState {
    pub member_id: MemberId,
    pub match_index: LogIndex,
    pub next_index: LogIndex,
    pub failure_count: u32,
    pub commit_start_time: Option<u64>,
    pub snapshot_index: LogIndex,
    pub snapshot_offset: u64,
}

impl PeerReplicationState {
    pub fn new(member_id: MemberId, next_index: LogIndex) -> Self {
        Self {
            member_id,
            match_index: LogIndex::ZERO,
            next_index,
            failure_count: 0,
            commit_start_time: None,
            snapshot_index: LogIndex::ZERO,
            snapshot_offset: 0,
        }
    }

    /// Applies a successful `AppendEntriesResponse`.
    pub fn on_append_success(&mut self, replicated_index: LogIndex) {
        self.match_index = self.match_index.max(replicated_index);
        self.next_index = self.next_index.max(self.match_index.next());
        self.failure_count = 0;
    }

    /// Applies a consistency-rejection `AppendEntriesResponse`.
    pub fn on_append_rejected(&mut self, resync_hint: LogIndex, log_first_index: LogIndex) {
        self.match_index = resync_hint;
        self.next_index = if resync_hint.is_zero() {
            log_first_index
        } else {
            resync_hint.next()
        };
        self.failure_count += 1;
    }
}

/// Computes the median `match_index` over the voting quorum (§4.4): commit
/// index advances to this value, but only if it is at least
/// `leader_initial_noop_index` (leader-completeness safety).
pub fn median_match_index(
    peers: &HashMap<MemberId, PeerReplicationState>,
    voting_members: &[MemberId],
    local_last_index: LogIndex,
) -> LogIndex {
    let mut indices: Vec<LogIndex> = voting_members
        .iter()
        .map(|id| {
            peers
                .get(id)
                .map(|p| p.match_index)
                .unwrap_or(local_last_index)
        })
        .collect();
    indices.sort_unstable();
    indices[indices.len() / 2]
}

/// Whether the computed median is eligible to become the new commit index:
/// it must be at least the leader's own no-op commit point (§4.4's
/// leader-completeness rule — never commit a prior term's entry before the
/// current term's own entry commits).
pub fn commit_index_candidate(median: LogIndex, leader_initial_noop_index: LogIndex) -> Option<LogIndex> {
    if median >= leader_initial_noop_index {
        Some(median)
    } else {
        None
    }
}
