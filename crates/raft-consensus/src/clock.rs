//! Deterministic replay clock.
//!
//! Within apply paths, wall-clock reads would make replay non-deterministic
//! across replicas. Instead the apply-path clock advances only as committed
//! entries carrying timestamps are applied: `clock = max(clock, entry.timestamp)`.
//! Non-apply paths (replication round-trips, timers) read the wall clock
//! directly and never touch this type.

use raft_types::Timestamp;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicClock {
    now: Timestamp,
}

impl DeterministicClock {
    pub fn new() -> Self {
        Self {
            now: Timestamp::ZERO,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Advances the clock to `max(self.now, observed)`. Called once per
    /// applied entry that carries a timestamp.
    pub fn observe(&mut self, observed: Timestamp) {
        self.now = self.now.advance(observed);
    }
}
