//! # raft-consensus: the server consensus role state machine and session layer
//!
//! Built around [`replica::ReplicaState`], a pure FCIS core: one event in,
//! one `(ReplicaState, ReplicaOutput)` out. Everything touching the wire,
//! wall clock, or disk lives in the embedding application; this crate only
//! describes what that shell should do next.

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod replica;
pub mod session;
pub mod vote_store;

pub use clock::DeterministicClock;
pub use config::ClusterConfig;
pub use error::{ConsensusError, SessionError};
pub use replica::{ClientCompletion, ReplicaEvent, ReplicaOutput, ReplicaState, TimeoutKind};
pub use session::{CommandOutcome, Event, SessionRegistry};
pub use vote_store::VoteStore;
