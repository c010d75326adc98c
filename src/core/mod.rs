//! Core ledger data model
//!
//! This module contains the fundamental building blocks:
//! - Transactions (signed, content-addressed learner actions)
//! - Blocks (headers carrying the puzzle answer and proof of access)
//! - The quiz puzzle bank

pub mod block;
pub mod puzzle;
pub mod transaction;

pub use block::{
    Attestation, Block, BlockHeader, BLOCK_VERSION, DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH,
    MAX_CLOCK_SKEW_MS, PROJECT_EPOCH_MS,
};
pub use puzzle::{PuzzleBank, PuzzleError, PuzzleOffer, QuizQuestion, ANSWERS_PER_QUESTION};
pub use transaction::{
    Priority, SignedPayload, Transaction, TransactionBuilder, TransactionContent, TransactionType,
};

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
