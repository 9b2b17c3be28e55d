//! Persists the data every server must recover before it may safely vote or
//! replicate: current term, last vote, and the latest committed
//! configuration.
//!
//! Layout (fixed 12-byte header, then a variable configuration record):
//! `[term:u64][voted_for:u32][configuration_version:u64][serialized_members]`.
//! `voted_for` of `u32::MAX` denotes "no vote cast this term".

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use raft_types::{Configuration, LogIndex, MemberId, Term};

use crate::error::LogError;

const NO_VOTE: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct MetaState {
    pub term: Term,
    pub voted_for: Option<MemberId>,
    pub configuration: Configuration,
}

impl Default for MetaState {
    fn default() -> Self {
        Self {
            term: Term::ZERO,
            voted_for: None,
            configuration: Configuration::empty(),
        }
    }
}

/// Durable store for [`MetaState`], backed by a single file.
pub struct MetaStore {
    path: PathBuf,
    state: MetaState,
}

impl MetaStore {
    /// Opens (or creates) the meta file at `path`, loading any persisted
    /// state.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        let state = if path.exists() {
            Self::load(&path)?
        } else {
            MetaState::default()
        };
        Ok(Self { path, state })
    }

    fn load(path: &Path) -> Result<MetaState, LogError> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        if buf.len() < 12 {
            return Ok(MetaState::default());
        }
        let term = u64::from_le_bytes(buf[0..8].try_into().expect("checked above"));
        let voted_for_raw = u32::from_le_bytes(buf[8..12].try_into().expect("checked above"));
        let voted_for = if voted_for_raw == NO_VOTE {
            None
        } else {
            Some(MemberId::new(u64::from(voted_for_raw)))
        };
        let configuration = if buf.len() > 12 {
            serde_json::from_slice(&buf[12..]).map_err(|e| LogError::Codec(e.to_string()))?
        } else {
            Configuration::empty()
        };
        Ok(MetaState {
            term: Term::new(term),
            voted_for,
            configuration,
        })
    }

    pub fn term(&self) -> Term {
        self.state.term
    }

    pub fn voted_for(&self) -> Option<MemberId> {
        self.state.voted_for
    }

    pub fn configuration(&self) -> &Configuration {
        &self.state.configuration
    }

    /// Persists a new `(term, voted_for)` pair. Called BEFORE issuing
    /// `VoteRequest`s or `PollRequest`s so a crash mid-election never causes
    /// a double vote within the same term.
    pub fn persist_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), LogError> {
        self.state.term = term;
        self.state.voted_for = voted_for;
        self.flush()
    }

    pub fn persist_configuration(&mut self, configuration: Configuration) -> Result<(), LogError> {
        self.state.configuration = configuration;
        self.flush()
    }

    fn flush(&self) -> Result<(), LogError> {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&self.state.term.as_u64().to_le_bytes());
        let voted_for_raw = self
            .state
            .voted_for
            .map(|m| m.as_u64() as u32)
            .unwrap_or(NO_VOTE);
        buf.extend_from_slice(&voted_for_raw.to_le_bytes());
        let config_bytes =
            serde_json::to_vec(&self.state.configuration).map_err(|e| LogError::Codec(e.to_string()))?;
        buf.extend_from_slice(&config_bytes);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// The configuration version, for convenience (mirrors `Configuration`'s
    /// own `version` field — see spec note that `version` equals the
    /// owning entry's log index).
    pub fn configuration_version(&self) -> LogIndex {
        self.state.configuration.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_vote_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");
        {
            let mut store = MetaStore::open(&path).unwrap();
            store
                .persist_vote(Term::new(5), Some(MemberId::new(2)))
                .unwrap();
        }
        let reopened = MetaStore::open(&path).unwrap();
        assert_eq!(reopened.term(), Term::new(5));
        assert_eq!(reopened.voted_for(), Some(MemberId::new(2)));
    }

    #[test]
    fn no_vote_round_trips_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");
        let mut store = MetaStore::open(&path).unwrap();
        store.persist_vote(Term::new(1), None).unwrap();
        let reopened = MetaStore::open(&path).unwrap();
        assert_eq!(reopened.voted_for(), None);
    }
}
