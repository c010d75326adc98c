//! Proof of Knowledge consensus.
//!
//! The right to propose a block is earned by answering a quiz question that
//! was unlocked by the proposer's own recorded lesson progress. The engine:
//!
//! - selects a puzzle for a learner from their latest progress transaction,
//! - builds block proposals carrying the answer as the header nonce,
//! - verifies answers, cheaply against the whole bank or authoritatively
//!   against the lesson the proof of access points to,
//! - penalises failed proposers and returns their transactions to the
//!   mempool.
//!
//! Transaction lookups scan the chain backwards from the tip, which is
//! linear in chain length.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{
    now_millis, Block, BlockHeader, PuzzleBank, PuzzleOffer, Transaction, BLOCK_VERSION,
};
use crate::storage::{ChainStore, PenaltyBoxEntry, StoreError};
use crate::validation::{
    are_attestations_valid, calculate_merkle_root, validate_block, validate_block_structure,
    validate_typed_transaction,
};

use super::config::ConsensusConfig;
use super::error::ConsensusError;

/// Highest valid answer index
pub const MAX_ANSWER_INDEX: u64 = 3;

/// Result of [`ConsensusEngine::handle_failed_block`]
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBlockOutcome {
    pub penalty: PenaltyBoxEntry,
    /// Transactions put back into the mempool
    pub restored: usize,
    /// Transactions dropped as invalid or already confirmed
    pub discarded: usize,
}

/// Find a transaction by its content hash, scanning from tip to genesis.
pub fn get_transaction_by_hash<'a>(hash: &str, store: &'a ChainStore) -> Option<&'a Transaction> {
    store
        .blocks_descending()
        .flat_map(|block| block.transactions.iter().rev())
        .find(|tx| tx.hash() == hash)
}

/// The puzzle engine for one node.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    pub config: ConsensusConfig,
    bank: Arc<PuzzleBank>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, bank: Arc<PuzzleBank>) -> Self {
        Self { config, bank }
    }

    pub fn puzzle_bank(&self) -> &PuzzleBank {
        &self.bank
    }

    /// The most recent confirmed progress transaction by `user_public_key`.
    pub fn latest_progress<'a>(
        &self,
        user_public_key: &str,
        store: &'a ChainStore,
    ) -> Option<&'a Transaction> {
        store
            .blocks_descending()
            .flat_map(|block| block.transactions.iter().rev())
            .find(|tx| tx.is_lesson_progress() && tx.public_key == user_public_key)
    }

    /// Offer a puzzle for the user's most recent confirmed lesson.
    ///
    /// Returns `None` when the chain is empty, the user has no progress on
    /// chain, or the bank has no question for that lesson.
    pub fn select_puzzle_for_user(
        &self,
        user_public_key: &str,
        store: &ChainStore,
    ) -> Option<PuzzleOffer> {
        let progress = self.latest_progress(user_public_key, store)?;
        self.select_puzzle_for_transaction(progress)
    }

    /// Offer a puzzle bound to a specific progress transaction.
    pub fn select_puzzle_for_transaction(&self, progress: &Transaction) -> Option<PuzzleOffer> {
        if !progress.is_lesson_progress() {
            return None;
        }
        let lesson_id = progress.lesson_id()?;
        let candidates = self.bank.questions_for_lesson(lesson_id);
        let question = candidates.choose(&mut rand::thread_rng())?;

        log::debug!(
            "Offering puzzle {} for lesson {}",
            question.question_id,
            lesson_id
        );
        Some(PuzzleOffer {
            question: (*question).clone(),
            proof_of_access_hash: progress.hash(),
        })
    }

    /// Build a sealed block on top of `previous_block`. Nothing is stored.
    pub fn propose_block(
        &self,
        transactions: Vec<Transaction>,
        previous_block: &Block,
        puzzle_solution: u64,
        proof_of_access_hash: String,
    ) -> Block {
        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash: previous_block.hash().unwrap_or_default().to_string(),
            merkle_root: calculate_merkle_root(&transactions),
            timestamp: now_millis(),
            nonce: puzzle_solution,
            proof_of_access_hash: Some(proof_of_access_hash),
            difficulty: self.config.difficulty,
            height: previous_block.height() + 1,
            hash: None,
        };
        header.seal();

        Block {
            header,
            transactions,
            attestations: Vec::new(),
        }
    }

    /// Context-free pre-filter: the nonce is an answer index that is correct
    /// for *some* question in the bank.
    ///
    /// This cannot tell which lesson the answer belongs to, so it must never
    /// be the only gate before accepting a block.
    pub fn verify_puzzle_solution(&self, header: &BlockHeader) -> bool {
        header.nonce <= MAX_ANSWER_INDEX && self.bank.is_correct_answer_anywhere(header.nonce)
    }

    pub fn get_transaction_by_hash<'a>(
        &self,
        hash: &str,
        store: &'a ChainStore,
    ) -> Option<&'a Transaction> {
        get_transaction_by_hash(hash, store)
    }

    fn answer_matches_progress(&self, header: &BlockHeader, progress: &Transaction) -> bool {
        if !progress.is_lesson_progress() || header.nonce > MAX_ANSWER_INDEX {
            return false;
        }
        match progress.lesson_id() {
            Some(lesson_id) => self.bank.is_correct_answer_for_lesson(lesson_id, header.nonce),
            None => false,
        }
    }

    /// Authoritative check: the proof of access resolves on chain to a
    /// progress transaction and the nonce answers a question of its lesson.
    pub fn verify_puzzle_solution_with_context(
        &self,
        header: &BlockHeader,
        store: &ChainStore,
    ) -> bool {
        let Some(proof) = header.proof_of_access_hash.as_deref() else {
            return false;
        };
        match get_transaction_by_hash(proof, store) {
            Some(progress) => self.answer_matches_progress(header, progress),
            None => false,
        }
    }

    /// Acceptance check for an incoming block.
    ///
    /// Like [`Self::verify_puzzle_solution_with_context`], but the proof may
    /// also point at a progress transaction confirmed by the block itself.
    pub fn verify_block_puzzle(&self, block: &Block, store: &ChainStore) -> bool {
        let Some(proof) = block.header.proof_of_access_hash.as_deref() else {
            return false;
        };
        let progress = get_transaction_by_hash(proof, store)
            .or_else(|| block.transactions.iter().find(|tx| tx.hash() == proof));
        match progress {
            Some(progress) => self.answer_matches_progress(&block.header, progress),
            None => false,
        }
    }

    /// Full acceptance pipeline for a block proposed on top of the local tip.
    ///
    /// Structure, hash, Merkle root, transactions and attestations are
    /// checked first, then chain continuity, then the puzzle answer. The
    /// bank-wide pre-filter runs before the lesson-bound check.
    pub fn check_proposal(&self, block: &Block, store: &ChainStore) -> Result<(), ConsensusError> {
        validate_block_structure(block)?;
        validate_block(block, store)?;
        if !are_attestations_valid(block) {
            return Err(ConsensusError::BadAttestation);
        }

        let tip = store.get_latest_block().ok_or(ConsensusError::EmptyChain)?;
        if block.height() != tip.height() + 1 {
            return Err(ConsensusError::NotExtendingTip {
                tip: tip.height(),
                got: block.height(),
            });
        }
        if tip.hash() != Some(block.header.previous_hash.as_str()) {
            return Err(ConsensusError::PreviousHashMismatch);
        }

        let mut seen = HashSet::new();
        for tx in &block.transactions {
            if !seen.insert(tx.id.as_str()) {
                return Err(ConsensusError::DuplicateTransaction(tx.id.clone()));
            }
            if store.is_transaction_confirmed(&tx.id) {
                return Err(ConsensusError::AlreadyConfirmed(tx.id.clone()));
            }
        }

        if !self.verify_puzzle_solution(&block.header) || !self.verify_block_puzzle(block, store) {
            return Err(ConsensusError::WrongAnswer);
        }
        Ok(())
    }

    /// Penalise the proposer of a rejected block and return its
    /// transactions to the mempool.
    ///
    /// Only transactions that validate on their own and are not yet
    /// confirmed are re-pooled.
    pub fn handle_failed_block(
        &self,
        block: &Block,
        proposer_public_key: &str,
        store: &mut ChainStore,
    ) -> Result<FailedBlockOutcome, StoreError> {
        let now = now_millis();
        let expiry = match store.get_active_penalty(proposer_public_key) {
            Some(active) => active.expiry_timestamp + self.config.penalty_duration_ms,
            None => now + self.config.penalty_duration_ms,
        };
        let penalty = PenaltyBoxEntry {
            public_key: proposer_public_key.to_string(),
            score_multiplier: self.config.penalty_multiplier,
            expiry_timestamp: expiry,
        };
        store.set_penalty(penalty.clone())?;

        let mut discarded = 0;
        let mut candidates = Vec::new();
        for tx in &block.transactions {
            if store.mempool_contains(&tx.id) {
                continue;
            }
            if validate_typed_transaction(tx).is_err() || store.is_transaction_confirmed(&tx.id) {
                discarded += 1;
                continue;
            }
            candidates.push(tx.clone());
        }
        let restored = store.add_many_to_mempool(candidates)?;

        log::warn!(
            "Rejected block {} from {}: penalty until {}, {} transactions restored, {} discarded",
            block.hash().unwrap_or("<unsealed>"),
            proposer_public_key,
            expiry,
            restored,
            discarded
        );
        Ok(FailedBlockOutcome {
            penalty,
            restored,
            discarded,
        })
    }
}
