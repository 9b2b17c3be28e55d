//! Error types for the segmented log.
//!
//! Invariant violations (truncating below the commit index, appending below
//! `last_index`) are programming errors, not recoverable conditions — the
//! log-owning call site `panic!`s rather than returning one of these.

use raft_types::LogIndex;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("unexpected end of data while decoding a record")]
    UnexpectedEof,

    #[error("checksum mismatch decoding entry at index {index}")]
    Corrupt { index: u64 },

    #[error("failed to encode or decode entry payload: {0}")]
    Codec(String),

    #[error("index {0} is not present in the log")]
    IndexNotFound(LogIndex),

    #[error("segment {0} is locked and cannot accept further writes")]
    SegmentLocked(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
