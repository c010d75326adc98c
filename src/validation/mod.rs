//! Validation of transactions and blocks
//!
//! Pure predicates: apart from read-only store lookups they have no side
//! effects, and malformed input yields `false`, never a panic.

pub mod rules;
pub mod schema;

use crate::core::TransactionType;
use thiserror::Error;

pub use rules::{
    are_all_transactions_valid, are_attestations_valid, calculate_merkle_root,
    is_block_hash_correct, is_block_structure_valid, is_block_valid, is_merkle_root_correct,
    is_proof_of_access_valid, is_transaction_valid, validate_all_transactions, validate_block,
    validate_block_structure, validate_header_structure, validate_transaction,
};
pub use schema::{is_transaction_schema_valid, validate_schema, validate_typed_transaction};

/// Why a transaction or block was rejected
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field {0}: {1}")]
    InvalidField(&'static str, String),
    #[error("Transaction id does not match its content")]
    IdMismatch,
    #[error("Signature verification failed")]
    BadSignature,
    #[error("Invalid {0} payload: {1}")]
    Schema(TransactionType, String),
    #[error("Block timestamp {0} outside the accepted window")]
    TimestampOutOfRange(i64),
    #[error("Block hash does not match its header")]
    HashMismatch,
    #[error("Merkle root does not match the transactions")]
    MerkleRootMismatch,
    #[error("Missing or malformed proof-of-access hash")]
    InvalidProofOfAccess,
    #[error("Block has no transactions")]
    EmptyBlock,
    #[error("Transaction {0} invalid: {1}")]
    Transaction(String, Box<ValidationError>),
}
