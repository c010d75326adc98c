//! Block implementation for the ledger
//!
//! A block contains a header with metadata, the transactions it confirms and
//! the attestations of the nodes that vouched for it. The header `nonce`
//! carries the quiz answer index that earned the right to propose.

use crate::core::transaction::Transaction;
use crate::crypto::{hash, merkle_root, verify, KeyPair};
use serde::{Deserialize, Serialize};

// =============================================================================
// Block Constants
// =============================================================================

/// Current block version
pub const BLOCK_VERSION: u32 = 1;

/// Fixed proposal difficulty (knowledge, not work, gates proposals)
pub const DEFAULT_DIFFICULTY: u32 = 1;

/// Earliest acceptable block timestamp: 2024-01-01T00:00:00Z in milliseconds
pub const PROJECT_EPOCH_MS: i64 = 1_704_067_200_000;

/// How far past local "now" a block timestamp may be
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// Previous-hash value of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: String,
    pub merkle_root: String,
    /// Creation time in Unix milliseconds
    pub timestamp: i64,
    /// Puzzle answer index
    pub nonce: u64,
    /// Hash of the progress transaction that unlocked the puzzle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_of_access_hash: Option<String>,
    pub difficulty: u32,
    pub height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl BlockHeader {
    /// Calculate the hash of the header with its `hash` field removed
    pub fn compute_hash(&self) -> String {
        let mut content = self.clone();
        content.hash = None;
        hash(&content)
    }

    /// Set `hash` from the current contents
    pub fn seal(&mut self) {
        self.hash = Some(self.compute_hash());
    }
}

/// A signature over a block hash by one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub public_key: String,
    pub signature: String,
}

impl Attestation {
    pub fn verify(&self, block_hash: &str) -> bool {
        verify(&self.signature, block_hash, &self.public_key)
    }
}

/// A block in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub attestations: Vec<Attestation>,
}

impl Block {
    /// Create the genesis block
    ///
    /// Every field is fixed so that all nodes derive the same genesis hash.
    pub fn genesis() -> Self {
        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            merkle_root: Self::calculate_merkle_root(&[]),
            timestamp: PROJECT_EPOCH_MS,
            nonce: 0,
            proof_of_access_hash: None,
            difficulty: DEFAULT_DIFFICULTY,
            height: 0,
            hash: None,
        };
        header.seal();

        Self {
            header,
            transactions: Vec::new(),
            attestations: Vec::new(),
        }
    }

    /// Calculate the Merkle root over `hash(tx)` leaves
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let leaves: Vec<String> = transactions.iter().map(Transaction::hash).collect();
        merkle_root(&leaves)
    }

    /// The sealed hash, if present
    pub fn hash(&self) -> Option<&str> {
        self.header.hash.as_deref()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Add this node's signature over the block hash
    ///
    /// Does nothing for an unsealed block.
    pub fn attest(&mut self, keys: &KeyPair) {
        let Some(block_hash) = self.header.hash.clone() else {
            return;
        };
        let public_key = keys.public_key_hex();
        if self.attestations.iter().any(|a| a.public_key == public_key) {
            return;
        }
        self.attestations.push(Attestation {
            signature: keys.sign(block_hash.as_str()),
            public_key,
        });
    }

    /// Ids of the transactions in this block
    pub fn transaction_ids(&self) -> Vec<String> {
        self.transactions.iter().map(|tx| tx.id.clone()).collect()
    }
}
