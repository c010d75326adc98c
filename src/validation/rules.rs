//! Structural and cryptographic validity predicates
//!
//! Each check comes in two forms: a `validate_*` function that reports the
//! first failure as a [`ValidationError`], and an `is_*` predicate that
//! collapses it to a boolean. Nothing here panics on untrusted input.

use crate::core::{
    now_millis, Block, BlockHeader, Transaction, MAX_CLOCK_SKEW_MS, PROJECT_EPOCH_MS,
};
use crate::crypto::{is_hex_digest, verify};
use crate::storage::ChainStore;

use super::ValidationError;

// =============================================================================
// Transactions
// =============================================================================

/// Mandatory fields, id and signature of a transaction
pub fn validate_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    for (field, value) in [
        ("id", &tx.id),
        ("publicKey", &tx.public_key),
        ("signature", &tx.signature),
    ] {
        if value.is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }
    if !tx.data.is_object() {
        return Err(ValidationError::InvalidField("data", "must be an object".into()));
    }
    if tx.timestamp < 0 {
        return Err(ValidationError::InvalidField("timestamp", "negative".into()));
    }

    if tx.compute_id() != tx.id {
        return Err(ValidationError::IdMismatch);
    }
    if !verify(&tx.signature, &tx.signed_payload(), &tx.public_key) {
        return Err(ValidationError::BadSignature);
    }
    Ok(())
}

pub fn is_transaction_valid(tx: &Transaction) -> bool {
    validate_transaction(tx).is_ok()
}

// =============================================================================
// Block structure
// =============================================================================

fn check_digest(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if is_hex_digest(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidField(field, "not a 64-char hex digest".into()))
    }
}

/// Field shapes and the timestamp window, against an explicit `now`
pub fn validate_header_structure(header: &BlockHeader, now: i64) -> Result<(), ValidationError> {
    if header.version == 0 {
        return Err(ValidationError::InvalidField("version", "zero".into()));
    }
    check_digest("previousHash", &header.previous_hash)?;
    check_digest("merkleRoot", &header.merkle_root)?;
    if let Some(proof) = &header.proof_of_access_hash {
        check_digest("proofOfAccessHash", proof)?;
    }
    if let Some(hash) = &header.hash {
        check_digest("hash", hash)?;
    }

    if header.timestamp < PROJECT_EPOCH_MS {
        return Err(ValidationError::TimestampOutOfRange(header.timestamp));
    }
    if header.timestamp > now.saturating_add(MAX_CLOCK_SKEW_MS) {
        return Err(ValidationError::TimestampOutOfRange(header.timestamp));
    }
    Ok(())
}

pub fn validate_block_structure(block: &Block) -> Result<(), ValidationError> {
    validate_header_structure(&block.header, now_millis())
}

pub fn is_block_structure_valid(block: &Block) -> bool {
    validate_block_structure(block).is_ok()
}

// =============================================================================
// Block content
// =============================================================================

/// Merkle root over `hash(tx)` leaves
pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
    Block::calculate_merkle_root(transactions)
}

pub fn is_block_hash_correct(block: &Block) -> bool {
    block.header.hash.as_deref() == Some(block.header.compute_hash().as_str())
}

pub fn is_merkle_root_correct(block: &Block) -> bool {
    calculate_merkle_root(&block.transactions) == block.header.merkle_root
}

/// Syntactic proof-of-access check
///
/// Resolving the proof to a progress transaction is the consensus layer's
/// job.
pub fn is_proof_of_access_valid(block: &Block, _store: &ChainStore) -> bool {
    block
        .header
        .proof_of_access_hash
        .as_deref()
        .is_some_and(is_hex_digest)
}

pub fn validate_all_transactions(block: &Block) -> Result<(), ValidationError> {
    if block.transactions.is_empty() {
        return Err(ValidationError::EmptyBlock);
    }
    for tx in &block.transactions {
        validate_transaction(tx)
            .map_err(|e| ValidationError::Transaction(tx.id.clone(), Box::new(e)))?;
    }
    Ok(())
}

pub fn are_all_transactions_valid(block: &Block) -> bool {
    validate_all_transactions(block).is_ok()
}

/// Every attestation signs the block hash
pub fn are_attestations_valid(block: &Block) -> bool {
    match block.hash() {
        Some(hash) => block.attestations.iter().all(|a| a.verify(hash)),
        None => false,
    }
}

/// Hash, Merkle root, proof of access and every transaction
pub fn validate_block(block: &Block, store: &ChainStore) -> Result<(), ValidationError> {
    if !is_block_hash_correct(block) {
        return Err(ValidationError::HashMismatch);
    }
    if !is_merkle_root_correct(block) {
        return Err(ValidationError::MerkleRootMismatch);
    }
    if !is_proof_of_access_valid(block, store) {
        return Err(ValidationError::InvalidProofOfAccess);
    }
    validate_all_transactions(block)
}

pub fn is_block_valid(block: &Block, store: &ChainStore) -> bool {
    validate_block(block, store).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionBuilder, TransactionType, BLOCK_VERSION, DEFAULT_DIFFICULTY};
    use crate::crypto::{hash, KeyPair};
    use serde_json::json;

    fn progress(keys: &KeyPair, lesson: &str) -> Transaction {
        TransactionBuilder::new(TransactionType::LessonProgress, json!({ "lessonId": lesson }))
            .sign(keys)
    }

    fn block_with(transactions: Vec<Transaction>) -> Block {
        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash: Block::genesis().hash().unwrap().to_string(),
            merkle_root: calculate_merkle_root(&transactions),
            timestamp: now_millis(),
            nonce: 1,
            proof_of_access_hash: Some(hash("proof")),
            difficulty: DEFAULT_DIFFICULTY,
            height: 1,
            hash: None,
        };
        header.seal();
        Block {
            header,
            transactions,
            attestations: Vec::new(),
        }
    }

    #[test]
    fn test_valid_transaction() {
        let keys = KeyPair::generate();
        assert!(is_transaction_valid(&progress(&keys, "l1")));
    }

    #[test]
    fn test_tampered_transaction_is_invalid() {
        let keys = KeyPair::generate();
        let tx = progress(&keys, "l1");

        let mut changed_data = tx.clone();
        changed_data.data = json!({"lessonId": "l2"});
        assert!(matches!(validate_transaction(&changed_data), Err(ValidationError::IdMismatch)));

        let mut wrong_author = tx.clone();
        wrong_author.public_key = KeyPair::generate().public_key_hex();
        assert!(!is_transaction_valid(&wrong_author));

        let mut forged = tx.clone();
        forged.signature = KeyPair::generate().sign(&tx.signed_payload());
        assert!(matches!(validate_transaction(&forged), Err(ValidationError::BadSignature)));

        let mut missing = tx;
        missing.signature.clear();
        assert!(matches!(
            validate_transaction(&missing),
            Err(ValidationError::MissingField("signature"))
        ));
    }

    #[test]
    fn test_merkle_root_properties() {
        let keys = KeyPair::generate();
        let a = progress(&keys, "a");
        let b = progress(&keys, "b");

        assert_eq!(calculate_merkle_root(&[]), hash(""));
        assert_eq!(calculate_merkle_root(&[a.clone()]), a.hash());
        assert_eq!(
            calculate_merkle_root(&[a.clone(), b.clone()]),
            calculate_merkle_root(&[a.clone(), b.clone()])
        );

        let mut mutated = b.clone();
        mutated.timestamp += 1;
        assert_ne!(
            calculate_merkle_root(&[a.clone(), b]),
            calculate_merkle_root(&[a, mutated])
        );
    }

    #[test]
    fn test_structure_checks() {
        let keys = KeyPair::generate();
        let block = block_with(vec![progress(&keys, "l1")]);
        assert!(is_block_structure_valid(&block));
        assert!(is_block_structure_valid(&Block::genesis()));

        let mut bad_prev = block.clone();
        bad_prev.header.previous_hash = "abc".to_string();
        assert!(!is_block_structure_valid(&bad_prev));

        let mut bad_proof = block.clone();
        bad_proof.header.proof_of_access_hash = Some("z".repeat(64));
        assert!(!is_block_structure_valid(&bad_proof));

        let mut too_old = block.clone();
        too_old.header.timestamp = PROJECT_EPOCH_MS - 1;
        assert!(!is_block_structure_valid(&too_old));

        let now = now_millis();
        let mut future = block.header.clone();
        future.timestamp = now + MAX_CLOCK_SKEW_MS + 1_000;
        assert!(matches!(
            validate_header_structure(&future, now),
            Err(ValidationError::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn test_block_validity() {
        let keys = KeyPair::generate();
        let store = ChainStore::in_memory();
        let block = block_with(vec![progress(&keys, "l1"), progress(&keys, "l2")]);
        assert!(is_block_valid(&block, &store));

        let mut bad_hash = block.clone();
        bad_hash.header.nonce = 2;
        assert!(!is_block_hash_correct(&bad_hash));
        assert!(!is_block_valid(&bad_hash, &store));

        let mut bad_merkle = block.clone();
        bad_merkle.transactions.pop();
        assert!(!is_merkle_root_correct(&bad_merkle));
        assert!(!is_block_valid(&bad_merkle, &store));

        let empty = block_with(Vec::new());
        assert!(!are_all_transactions_valid(&empty));
        assert!(matches!(validate_block(&empty, &store), Err(ValidationError::EmptyBlock)));

        let mut no_proof = block_with(vec![progress(&keys, "l1")]);
        no_proof.header.proof_of_access_hash = None;
        no_proof.header.seal();
        assert!(!is_proof_of_access_valid(&no_proof, &store));
        assert!(!is_block_valid(&no_proof, &store));
    }

    #[test]
    fn test_invalid_transaction_invalidates_block() {
        let keys = KeyPair::generate();
        let mut tx = progress(&keys, "l1");
        tx.signature = "00".repeat(64);
        let block = block_with(vec![tx]);

        assert!(is_block_hash_correct(&block));
        assert!(!are_all_transactions_valid(&block));
        assert!(!is_block_valid(&block, &ChainStore::in_memory()));
    }

    #[test]
    fn test_attestations() {
        let keys = KeyPair::generate();
        let mut block = block_with(vec![progress(&keys, "l1")]);
        block.attest(&keys);
        assert!(are_attestations_valid(&block));

        block.attestations[0].public_key = KeyPair::generate().public_key_hex();
        assert!(!are_attestations_valid(&block));
    }
}
