//! Tuning knobs constructed by the embedding application. No CLI or file
//! format of its own (CLI plumbing is out of scope); this is a plain,
//! documented struct the same way `kimberlite_storage::CheckpointPolicy` is.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base election timeout. Candidates additionally wait
    /// `rand(0..election_timeout)` on top of this, per §4.4.
    pub election_timeout: Duration,

    /// Interval between leader heartbeats / `AppendEntries` keep-alives.
    pub heartbeat_interval: Duration,

    /// Maximum bytes of log entries batched into a single `AppendEntries`.
    pub max_batch_bytes: u64,

    /// Maximum entries in a segment before rollover.
    pub max_segment_entries: u32,

    /// Maximum bytes in a segment before rollover.
    pub max_segment_bytes: u64,

    /// Default session timeout when a client does not request one.
    pub default_session_timeout: Duration,

    /// Number of election timeouts a leader may go without majority contact
    /// before stepping down (§5 Cancellation & timeouts).
    pub leader_step_down_timeouts: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            max_batch_bytes: 1024 * 1024,
            max_segment_entries: 100_000,
            max_segment_bytes: 64 * 1024 * 1024,
            default_session_timeout: Duration::from_secs(5),
            leader_step_down_timeouts: 2,
        }
    }
}
