//! Two-phase compaction: minor (per-segment, drops cleaned non-tombstones)
//! and major (combines consecutive segments and additionally drops
//! tombstones once they are safely below the global replication watermark).

use raft_types::LogIndex;

use crate::segment::{Segment, SegmentDescriptor};

/// Rewrites `segment` into a fresh replacement, dropping any offset that is
/// cleaned AND (not a tombstone OR its index is at or below
/// `major_compact_index`). Cleaned offsets that are kept are re-marked clean
/// in the replacement, so a later replay does not reapply them.
///
/// The caller is responsible for atomically installing the replacement in
/// place of `segment` (see `SegmentedLog::minor_compact`) — this function
/// performs no I/O and has no visible effect until its result replaces the
/// original.
pub fn minor_compact(segment: &Segment, major_compact_index: LogIndex) -> Segment {
    let clean_before = segment.clean_predicate();
    let mut descriptor = segment.descriptor.clone();
    descriptor.version += 1;
    let mut replacement = Segment::new(descriptor);

    for offset in 0..segment.len() {
        let index = LogIndex::new(segment.base_index().as_u64() + offset as u64);
        let Some(entry) = segment.entry_at_offset(offset) else {
            replacement.skip(1);
            continue;
        };
        let cleaned = clean_before.get(offset).copied().unwrap_or(false);
        let discardable = cleaned && (!entry.is_tombstone() || index <= major_compact_index);
        if discardable {
            replacement.skip(1);
        } else {
            let size = crate::segment::entry_wire_size(entry);
            replacement.append(entry.clone(), size);
            if cleaned {
                replacement.clean(index);
            }
        }
    }
    replacement.lock();
    replacement
}

/// Combines a run of consecutive, ascending segments into one, additionally
/// dropping snapshottable entries at or below `snapshot_index` and
/// tombstones at or below `major_compact_index` whose counterpart has
/// already been cleaned.
///
/// Per the contract: clean predicates are snapshotted from every input
/// segment up front, before any entry is rewritten, so a clean that arrives
/// mid-run cannot affect this compaction's decisions.
pub fn major_compact_group(
    group: &[Segment],
    major_compact_index: LogIndex,
    snapshot_index: LogIndex,
) -> Segment {
    assert!(!group.is_empty(), "major compaction requires at least one segment");
    let predicates: Vec<Vec<bool>> = group.iter().map(Segment::clean_predicate).collect();

    let first = &group[0];
    let max_size = group.iter().map(|s| s.descriptor.max_size).max().unwrap();
    let max_entries = group.iter().map(|s| s.descriptor.max_entries).max().unwrap();
    let mut descriptor = SegmentDescriptor::new(first.descriptor.id, first.base_index(), max_size, max_entries);
    descriptor.version = first.descriptor.version + 1;
    let mut replacement = Segment::new(descriptor);

    for (segment, clean_before) in group.iter().zip(predicates.iter()) {
        for offset in 0..segment.len() {
            let index = LogIndex::new(segment.base_index().as_u64() + offset as u64);
            let cleaned = clean_before.get(offset).copied().unwrap_or(false);
            let entry = segment.entry_at_offset(offset);

            let Some(entry) = entry else {
                replacement.skip(1);
                continue;
            };

            if entry.is_snapshottable() && index <= snapshot_index {
                replacement.skip(1);
                continue;
            }

            if !entry.is_tombstone() || index <= major_compact_index {
                if cleaned {
                    replacement.skip(1);
                    continue;
                }
                let size = crate::segment::entry_wire_size(entry);
                replacement.append(entry.clone(), size);
            } else {
                // Tombstone must be retained: its counterpart is not yet
                // safely discardable everywhere.
                let size = crate::segment::entry_wire_size(entry);
                replacement.append(entry.clone(), size);
                if cleaned {
                    replacement.clean(index);
                }
            }
        }
    }
    replacement.lock();
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use raft_types::{ConsistencyLevel, RequestSeq, SessionId, Term, Timestamp};
    use crate::entry::LogEntry;

    fn command(index: u64, tombstone: bool) -> LogEntry {
        LogEntry::new(
            LogIndex::new(index),
            Term::new(1),
            EntryKind::Command {
                session: SessionId::new(1),
                sequence: RequestSeq::new(index),
                timestamp: Timestamp::ZERO,
                payload: bytes::Bytes::new(),
                consistency: ConsistencyLevel::Sequential,
                tombstone,
            },
        )
    }

    fn noop(index: u64) -> LogEntry {
        LogEntry::new(
            LogIndex::new(index),
            Term::new(1),
            EntryKind::NoOp {
                timestamp: Timestamp::ZERO,
            },
        )
    }

    #[test]
    fn minor_compact_drops_cleaned_non_tombstone() {
        let mut seg = Segment::new(SegmentDescriptor::new(0, LogIndex::new(1), 1 << 20, 100));
        seg.append(noop(1), 8);
        seg.clean(LogIndex::new(1));
        let replacement = minor_compact(&seg, LogIndex::ZERO);
        assert!(replacement.get(LogIndex::new(1)).is_none());
    }

    #[test]
    fn minor_compact_retains_tombstone_above_major_compact_index() {
        let mut seg = Segment::new(SegmentDescriptor::new(0, LogIndex::new(1), 1 << 20, 100));
        seg.append(command(1, true), 8);
        seg.clean(LogIndex::new(1));
        let replacement = minor_compact(&seg, LogIndex::ZERO);
        assert!(replacement.get(LogIndex::new(1)).is_some());

        let replacement_ok = minor_compact(&seg, LogIndex::new(1));
        assert!(replacement_ok.get(LogIndex::new(1)).is_none());
    }

    #[test]
    fn major_compact_respects_major_compact_index_scenario_s3() {
        // Mirrors scenario S3: a non-tombstone `Command{SET k=v}` at index
        // 10, a tombstone `Command{DELETE k}` at index 12345, both cleaned.
        let mut seg1 = Segment::new(SegmentDescriptor::new(0, LogIndex::new(10), 1 << 20, 100000));
        seg1.append(command(10, false), 8);
        seg1.clean(LogIndex::new(10));
        let mut seg2 = Segment::new(SegmentDescriptor::new(1, LogIndex::new(12345), 1 << 20, 100000));
        seg2.append(command(12345, true), 8);
        seg2.clean(LogIndex::new(12345));

        let group = vec![seg1.clone(), seg2.clone()];
        let retains_tombstone = major_compact_group(&group, LogIndex::new(12344), LogIndex::ZERO);
        assert!(retains_tombstone.get(LogIndex::new(10)).is_none());
        assert!(retains_tombstone.get(LogIndex::new(12345)).is_some());

        let group = vec![seg1, seg2];
        let drops_both = major_compact_group(&group, LogIndex::new(12345), LogIndex::ZERO);
        assert!(drops_both.get(LogIndex::new(10)).is_none());
        assert!(drops_both.get(LogIndex::new(12345)).is_none());
    }
}
