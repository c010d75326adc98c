//! PoK Ledger: a Proof of Knowledge ledger in Rust
//!
//! Learners record lesson progress as signed transactions. Instead of
//! mining, a node earns the right to propose a block by answering a quiz
//! question drawn for the lesson it just recorded. Features:
//! - Canonical-JSON hashing and secp256k1 ECDSA signatures
//! - Content-addressed transactions with per-type schema checks
//! - Priority-ordered mempool and time-boxed proposer penalties
//! - Announce-then-propose arbitration over a framed TCP gossip protocol
//! - Append-only block log with atomically rewritten side tables
//!
//! # Example
//!
//! ```rust,no_run
//! use pok_ledger::config::LedgerConfig;
//! use pok_ledger::service::LedgerService;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let service = LedgerService::open(LedgerConfig::default())?;
//! let handle = service.handle();
//! tokio::spawn(service.run());
//!
//! if let Some(offer) = handle
//!     .submit_lesson_progress(json!({"lessonId": "rust-101", "completed": true}))
//!     .await?
//! {
//!     println!("Question: {}", offer.question.question_text);
//!     let block_hash = handle.submit_puzzle_solution(0).await?;
//!     println!("Announced block {}", block_hash);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod network;
pub mod service;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use consensus::{ConsensusConfig, ConsensusEngine, ConsensusError};
pub use core::{
    Block, Priority, PuzzleBank, PuzzleOffer, QuizQuestion, Transaction, TransactionBuilder,
    TransactionType, DEFAULT_DIFFICULTY,
};
pub use crypto::KeyPair;
pub use network::{PeerMessage, PeerNode};
pub use service::{LedgerEvent, LedgerHandle, LedgerService, LedgerSnapshot, ServiceError};
pub use storage::{ChainStore, StorageConfig};
