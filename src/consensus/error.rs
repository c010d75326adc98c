use thiserror::Error;

use crate::storage::StoreError;
use crate::validation::ValidationError;

/// Reasons a proposal is refused or cannot be made
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),
    #[error("Invalid attestation")]
    BadAttestation,
    #[error("Block at height {got} does not extend tip at height {tip}")]
    NotExtendingTip { tip: u64, got: u64 },
    #[error("Block does not build on the local tip")]
    PreviousHashMismatch,
    #[error("Transaction {0} appears twice in the block")]
    DuplicateTransaction(String),
    #[error("Transaction {0} is already confirmed")]
    AlreadyConfirmed(String),
    #[error("Puzzle answer rejected")]
    WrongAnswer,
    #[error("No puzzle available")]
    NoPuzzleAvailable,
    #[error("Chain has no genesis block")]
    EmptyChain,
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
