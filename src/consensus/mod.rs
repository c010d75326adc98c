//! Proof of Knowledge consensus: puzzle selection, proposal and verification.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{ConsensusConfig, DEFAULT_PENALTY_DURATION_MS, DEFAULT_PENALTY_MULTIPLIER};
pub use error::ConsensusError;
pub use engine::{get_transaction_by_hash, ConsensusEngine, FailedBlockOutcome, MAX_ANSWER_INDEX};
