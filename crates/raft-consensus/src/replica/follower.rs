//! Follower-side `AppendEntries` handling: term/consistency checks,
//! divergent-suffix truncation, and gap-filling via `skip`.

use raft_log::{LogEntry, SegmentedLog};
use raft_types::{LogIndex, MemberId, Term};

use crate::message::{AppendEntriesRequest, AppendEntriesResponse};

/// Applies an incoming `AppendEntries` request to `log`, returning the
/// response to send back. `commit_index` is updated in place to
/// `min(log.last_index(), request.commit_index)` on success (§4.4); the
/// caller is responsible for then applying entries up to the new commit
/// index asynchronously.
pub fn handle_append_entries(
    log: &mut SegmentedLog,
    local_member_id: MemberId,
    current_term: Term,
    request: &AppendEntriesRequest,
    commit_index: &mut LogIndex,
) -> AppendEntriesResponse {
    if request.term < current_term {
        return AppendEntriesResponse {
            term: current_term,
            member_id: local_member_id,
            success: false,
            log_index: log.last_index(),
        };
    }

    if !request.prev_log_index.is_zero() {
        let local_entry = log.get(request.prev_log_index);
        let consistent = local_entry
            .map(|e| e.term == request.prev_log_term)
            .unwrap_or(false);
        if !consistent {
            let resync = request.prev_log_index.saturating_prev().min(log.last_index());
            return AppendEntriesResponse {
                term: current_term,
                member_id: local_member_id,
                success: false,
                log_index: resync,
            };
        }
    }

    for entry in &request.entries {
        apply_incoming_entry(log, entry.clone(), *commit_index);
    }

    let new_commit = log.last_index().min(request.commit_index);
    if new_commit > *commit_index {
        *commit_index = new_commit;
    }

    AppendEntriesResponse {
        term: current_term,
        member_id: local_member_id,
        success: true,
        log_index: log.last_index(),
    }
}

fn apply_incoming_entry(log: &mut SegmentedLog, entry: LogEntry, commit_index: LogIndex) {
    match log.get(entry.index) {
        None => {
            let gap = entry.index.as_u64().saturating_sub(log.last_index().next().as_u64());
            if gap > 0 {
                log.skip(gap as u32);
            }
            log.append(entry);
        }
        Some(local) if local.term == entry.term => {
            // Already present with a matching term: leave it alone.
        }
        Some(_) => {
            log.truncate(entry.index.saturating_prev(), commit_index);
            log.append(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_log::{EntryKind, SegmentSizing};
    use raft_types::Timestamp;

    fn noop(index: u64, term: u64) -> LogEntry {
        LogEntry::new(
            LogIndex::new(index),
            Term::new(term),
            EntryKind::NoOp {
                timestamp: Timestamp::ZERO,
            },
        )
    }

    #[test]
    fn rejects_stale_term() {
        let mut log = SegmentedLog::new(SegmentSizing::default());
        let mut commit_index = LogIndex::ZERO;
        let request = AppendEntriesRequest {
            term: Term::new(1),
            leader_id: MemberId::new(1),
            prev_log_index: LogIndex::ZERO,
            prev_log_term: Term::ZERO,
            entries: vec![],
            commit_index: LogIndex::ZERO,
            global_index: LogIndex::ZERO,
        };
        let response =
            handle_append_entries(&mut log, MemberId::new(2), Term::new(2), &request, &mut commit_index);
        assert!(!response.success);
    }

    #[test]
    fn appends_entries_into_empty_log() {
        let mut log = SegmentedLog::new(SegmentSizing::default());
        let mut commit_index = LogIndex::ZERO;
        let request = AppendEntriesRequest {
            term: Term::new(1),
            leader_id: MemberId::new(1),
            prev_log_index: LogIndex::ZERO,
            prev_log_term: Term::ZERO,
            entries: vec![noop(1, 1), noop(2, 1)],
            commit_index: LogIndex::new(1),
            global_index: LogIndex::ZERO,
        };
        let response =
            handle_append_entries(&mut log, MemberId::new(2), Term::new(1), &request, &mut commit_index);
        assert!(response.success);
        assert_eq!(log.last_index(), LogIndex::new(2));
        assert_eq!(commit_index, LogIndex::new(1));
    }

    #[test]
    fn diverging_term_truncates_and_replaces_suffix() {
        let mut log = SegmentedLog::new(SegmentSizing::default());
        log.append(noop(1, 1));
        log.append(noop(2, 1));
        let mut commit_index = LogIndex::ZERO;
        let request = AppendEntriesRequest {
            term: Term::new(2),
            leader_id: MemberId::new(1),
            prev_log_index: LogIndex::new(1),
            prev_log_term: Term::new(1),
            entries: vec![noop(2, 2)],
            commit_index: LogIndex::new(2),
            global_index: LogIndex::ZERO,
        };
        let response =
            handle_append_entries(&mut log, MemberId::new(2), Term::new(2), &request, &mut commit_index);
        assert!(response.success);
        assert_eq!(log.get(LogIndex::new(2)).unwrap().term, Term::new(2));
    }

    #[test]
    fn missing_prev_entry_returns_resync_hint() {
        let mut log = SegmentedLog::new(SegmentSizing::default());
        log.append(noop(1, 1));
        let mut commit_index = LogIndex::ZERO;
        let request = AppendEntriesRequest {
            term: Term::new(1),
            leader_id: MemberId::new(1),
            prev_log_index: LogIndex::new(5),
            prev_log_term: Term::new(1),
            entries: vec![],
            commit_index: LogIndex::ZERO,
            global_index: LogIndex::ZERO,
        };
        let response =
            handle_append_entries(&mut log, MemberId::new(2), Term::new(1), &request, &mut commit_index);
        assert!(!response.success);
        assert_eq!(response.log_index, LogIndex::new(1));
    }
}
