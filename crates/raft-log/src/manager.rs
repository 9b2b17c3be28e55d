//! The segmented log: the append/skip/truncate/get contract over an ordered
//! run of [`Segment`]s, plus rollover and the two compaction entry points.

use raft_types::LogIndex;
use tracing::{debug, info, instrument};

use crate::compaction::{major_compact_group, minor_compact};
use crate::entry::LogEntry;
use crate::segment::{entry_wire_size, Segment, SegmentDescriptor};

/// Segment sizing knobs. Part of the ambient configuration surface (see
/// `raft-engine::ClusterConfig`), not hardcoded, since segment size is a
/// deployment-specific tuning decision.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSizing {
    pub max_size_bytes: u64,
    pub max_entries: u32,
}

impl Default for SegmentSizing {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            max_entries: 100_000,
        }
    }
}

/// The segmented, append-only replicated log.
///
/// Segments are kept in ascending `base_index` order; the last segment is
/// always the writable one unless the log is empty.
pub struct SegmentedLog {
    segments: Vec<Segment>,
    sizing: SegmentSizing,
    next_segment_id: u64,
}

impl SegmentedLog {
    pub fn new(sizing: SegmentSizing) -> Self {
        Self {
            segments: Vec::new(),
            sizing,
            next_segment_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(Segment::is_empty)
    }

    pub fn first_index(&self) -> LogIndex {
        self.segments
            .first()
            .map(Segment::base_index)
            .unwrap_or(LogIndex::ZERO)
    }

    pub fn last_index(&self) -> LogIndex {
        self.segments
            .last()
            .map(Segment::last_index)
            .unwrap_or(LogIndex::ZERO)
    }

    fn segment_for(&self, index: LogIndex) -> Option<&Segment> {
        self.segments
            .iter()
            .rev()
            .find(|seg| seg.base_index() <= index)
    }

    fn segment_for_mut(&mut self, index: LogIndex) -> Option<&mut Segment> {
        self.segments
            .iter_mut()
            .rev()
            .find(|seg| seg.base_index() <= index)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.segment_for(index).and_then(|seg| seg.get(index))
    }

    /// Appends `entry` to the current writable segment, rolling over first
    /// if the segment is full. Returns the entry's index.
    #[instrument(skip(self, entry), fields(index = %entry.index))]
    pub fn append(&mut self, entry: LogEntry) -> LogIndex {
        let size = entry_wire_size(&entry);
        self.ensure_writable_segment(entry.index, size);
        let index = entry.index;
        let segment = self.segments.last_mut().expect("ensured above");
        segment.append(entry, size);
        index
    }

    /// Reserves `n` indices as holes in the current writable segment.
    pub fn skip(&mut self, n: u32) {
        if n == 0 {
            return;
        }
        let next_index = self.last_index().next();
        self.ensure_writable_segment(next_index, 0);
        self.segments.last_mut().expect("ensured above").skip(n);
    }

    fn ensure_writable_segment(&mut self, next_index: LogIndex, incoming_size: u64) {
        let needs_rollover = match self.segments.last() {
            None => true,
            Some(seg) => seg.is_locked() || seg.would_overflow(incoming_size),
        };
        if needs_rollover {
            let id = self.next_segment_id;
            self.next_segment_id += 1;
            info!(segment_id = id, base_index = %next_index, "rolling over to a new segment");
            self.segments.push(Segment::new(SegmentDescriptor::new(
                id,
                next_index,
                self.sizing.max_size_bytes,
                self.sizing.max_entries,
            )));
        }
    }

    /// Removes every entry with index strictly greater than `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is below `commit_index` — truncating committed
    /// entries is a log-invariant violation the caller must prevent.
    pub fn truncate(&mut self, index: LogIndex, commit_index: LogIndex) {
        assert!(
            index >= commit_index,
            "refusing to truncate committed entries: truncate({index}) < commit_index({commit_index})"
        );
        if index.is_zero() {
            self.segments.clear();
            return;
        }
        let cutoff = self
            .segments
            .iter()
            .position(|seg| seg.base_index() > index);
        if let Some(cutoff) = cutoff {
            self.segments.truncate(cutoff);
        }
        if let Some(seg) = self.segments.last_mut() {
            seg.truncate_after(index);
        }
    }

    /// Marks the offset owning `index` clean, across whichever segment
    /// currently holds it.
    pub fn clean(&mut self, index: LogIndex) {
        if let Some(seg) = self.segment_for_mut(index) {
            seg.clean(index);
        }
    }

    /// Runs minor compaction over every segment whose size warrants it,
    /// replacing compactable segments in place.
    #[instrument(skip(self))]
    pub fn minor_compact(&mut self, major_compact_index: LogIndex) {
        for seg in &mut self.segments {
            if seg.is_locked() || seg.is_empty() {
                continue;
            }
            let replacement = minor_compact(seg, major_compact_index);
            debug!(segment_id = seg.descriptor.id, "minor compaction complete");
            *seg = replacement;
        }
    }

    /// Runs major compaction, combining every segment whose index range
    /// falls entirely at or below `commit_index` into a single segment and
    /// removing tombstones no longer needed.
    #[instrument(skip(self))]
    pub fn major_compact(&mut self, major_compact_index: LogIndex, snapshot_index: LogIndex) {
        let cutoff = self
            .segments
            .iter()
            .position(|seg| seg.last_index() > major_compact_index)
            .unwrap_or(self.segments.len());
        // Never combine away the active (writable, unlocked) segment.
        let group_end = if cutoff == self.segments.len() {
            cutoff
        } else {
            cutoff
        };
        if group_end < 2 {
            return;
        }
        let group: Vec<Segment> = self.segments.drain(0..group_end).collect();
        let replacement = major_compact_group(&group, major_compact_index, snapshot_index);
        info!(
            segments_combined = group.len(),
            new_base = %replacement.base_index(),
            "major compaction complete"
        );
        self.segments.insert(0, replacement);
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl Default for SegmentedLog {
    fn default() -> Self {
        Self::new(SegmentSizing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_types::Term;
    use crate::entry::EntryKind;
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
    fn append_then_get_round_trips() {
        let mut log = SegmentedLog::default();
        log.append(noop(1, 1));
        log.append(noop(2, 1));
        assert_eq!(log.get(LogIndex::new(1)), Some(&noop(1, 1)));
        assert_eq!(log.last_index(), LogIndex::new(2));
    }

    #[test]
    fn empty_log_first_index_begins_at_zero() {
        let log = SegmentedLog::default();
        assert!(log.is_empty());
        assert_eq!(log.first_index(), LogIndex::ZERO);
        assert_eq!(log.last_index(), LogIndex::ZERO);
    }

    #[test]
    fn truncate_zero_clears_entire_log() {
        let mut log = SegmentedLog::default();
        log.append(noop(1, 1));
        log.append(noop(2, 1));
        log.truncate(LogIndex::ZERO, LogIndex::ZERO);
        assert!(log.is_empty());
    }

    #[test]
    #[should_panic(expected = "refusing to truncate committed entries")]
    fn truncate_below_commit_index_panics() {
        let mut log = SegmentedLog::default();
        log.append(noop(1, 1));
        log.append(noop(2, 1));
        log.truncate(LogIndex::new(1), LogIndex::new(2));
    }

    #[test]
    fn rollover_starts_new_segment_when_entry_count_exceeds_max() {
        let mut log = SegmentedLog::new(SegmentSizing {
            max_size_bytes: 1 << 30,
            max_entries: 2,
        });
        log.append(noop(1, 1));
        log.append(noop(2, 1));
        log.append(noop(3, 1));
        assert_eq!(log.segment_count(), 2);
    }
}
