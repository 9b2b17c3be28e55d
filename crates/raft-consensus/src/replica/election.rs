//! Pre-vote (poll) and vote acceptance rules, and the election-timeout
//! jitter draw.

use raft_types::{LogIndex, Term};

/// Whether a candidate's log is at least as up-to-date as the local log —
/// the acceptance predicate shared by both `PollRequest` and `VoteRequest`
/// handling (§4.4).
pub fn log_is_at_least_as_up_to_date(
    candidate_last_log_term: Term,
    candidate_last_log_index: LogIndex,
    local_last_log_term: Term,
    local_last_log_index: LogIndex,
) -> bool {
    candidate_last_log_term > local_last_log_term
        || (candidate_last_log_term == local_last_log_term
            && candidate_last_log_index >= local_last_log_index)
}

/// Draws the randomized portion of the election timeout:
/// `election_timeout + rand(0..election_timeout)`.
pub fn election_timeout_with_jitter(base_millis: u64, rng: &mut impl rand::Rng) -> u64 {
    base_millis + rng.gen_range(0..=base_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_term_wins_regardless_of_index() {
        assert!(log_is_at_least_as_up_to_date(
            Term::new(2),
            LogIndex::new(1),
            Term::new(1),
            LogIndex::new(100),
        ));
    }

    #[test]
    fn equal_term_compares_index() {
        assert!(log_is_at_least_as_up_to_date(
            Term::new(1),
            LogIndex::new(10),
            Term::new(1),
            LogIndex::new(5),
        ));
        assert!(!log_is_at_least_as_up_to_date(
            Term::new(1),
            LogIndex::new(4),
            Term::new(1),
            LogIndex::new(5),
        ));
    }

    #[test]
    fn empty_log_accepts_any_candidate() {
        assert!(log_is_at_least_as_up_to_date(
            Term::ZERO,
            LogIndex::ZERO,
            Term::ZERO,
            LogIndex::ZERO,
        ));
    }
}
