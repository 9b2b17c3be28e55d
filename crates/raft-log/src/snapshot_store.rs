//! Chunked state-machine snapshots, addressable by state-machine identifier
//! and log index.
//!
//! Layout: header `{id, index, timestamp, locked}` followed by opaque
//! state-machine bytes. A snapshot whose `locked` flag is unset is a partial
//! write from a crash mid-snapshot and is deleted on open rather than
//! trusted.

use std::io::Write;
use std::path::PathBuf;

use raft_types::{LogIndex, Timestamp};

use crate::error::LogError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SnapshotHeader {
    state_machine_id: String,
    index: u64,
    timestamp: u64,
    locked: bool,
}

/// A completed, locked snapshot read back from disk.
pub struct Snapshot {
    pub state_machine_id: String,
    pub index: LogIndex,
    pub timestamp: Timestamp,
    pub data: bytes::Bytes,
}

/// Manages snapshot files under a directory, one file per
/// `(state_machine_id, index)` pair.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, state_machine_id: &str, index: LogIndex) -> PathBuf {
        self.dir
            .join(format!("{state_machine_id}-{}.snapshot", index.as_u64()))
    }

    /// Writes a snapshot in two phases: the bytes first, then a final
    /// rename that only happens after the `locked` header is written — a
    /// crash during the write leaves no file at the canonical path.
    pub fn write(
        &self,
        state_machine_id: &str,
        index: LogIndex,
        timestamp: Timestamp,
        data: &[u8],
    ) -> Result<(), LogError> {
        std::fs::create_dir_all(&self.dir)?;
        let header = SnapshotHeader {
            state_machine_id: state_machine_id.to_string(),
            index: index.as_u64(),
            timestamp: timestamp.as_millis(),
            locked: true,
        };
        let header_bytes = serde_json::to_vec(&header).map_err(|e| LogError::Codec(e.to_string()))?;

        let final_path = self.path_for(state_machine_id, index);
        let tmp_path = final_path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        file.write_all(&header_bytes)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn read(&self, state_machine_id: &str, index: LogIndex) -> Result<Option<Snapshot>, LogError> {
        let path = self.path_for(state_machine_id, index);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        if bytes.len() < 4 {
            std::fs::remove_file(&path).ok();
            return Ok(None);
        }
        let header_len = u32::from_le_bytes(bytes[0..4].try_into().expect("checked above")) as usize;
        if bytes.len() < 4 + header_len {
            std::fs::remove_file(&path).ok();
            return Ok(None);
        }
        let header: SnapshotHeader = serde_json::from_slice(&bytes[4..4 + header_len])
            .map_err(|e| LogError::Codec(e.to_string()))?;
        if !header.locked {
            std::fs::remove_file(&path).ok();
            return Ok(None);
        }
        let data = bytes::Bytes::from(bytes[4 + header_len..].to_vec());
        Ok(Some(Snapshot {
            state_machine_id: header.state_machine_id,
            index: LogIndex::new(header.index),
            timestamp: Timestamp::from_millis(header.timestamp),
            data,
        }))
    }

    /// Deletes every snapshot for `state_machine_id` at or below `index`,
    /// keeping the most recent one regardless (the most recent locked
    /// snapshot must always remain readable for recovery).
    pub fn prune_before(&self, state_machine_id: &str, keep_index: LogIndex) -> Result<(), LogError> {
        if !self.dir.exists() {
            return Ok(());
        }
        let prefix = format!("{state_machine_id}-");
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(index_str) = rest.strip_suffix(".snapshot") {
                    if let Ok(index) = index_str.parse::<u64>() {
                        if index < keep_index.as_u64() {
                            std::fs::remove_file(entry.path()).ok();
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write("kv", LogIndex::new(100), Timestamp::from_millis(5), b"state-bytes")
            .unwrap();
        let snapshot = store.read("kv", LogIndex::new(100)).unwrap().unwrap();
        assert_eq!(snapshot.data.as_ref(), b"state-bytes");
        assert_eq!(snapshot.index, LogIndex::new(100));
    }

    #[test]
    fn missing_snapshot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.read("kv", LogIndex::new(1)).unwrap().is_none());
    }
}
