//! Transaction handling for the ledger
//!
//! A transaction records one learner action (lesson progress, a bookmark,
//! a star award, ...). Its `id` is the canonical hash of its content and its
//! `signature` covers that content plus the `id`.

use crate::crypto::{hash, KeyPair};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::now_millis;

// =============================================================================
// Transaction Type & Priority
// =============================================================================

/// Tagged transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    LessonProgress,
    CreateUser,
    SetBookmark,
    AwardStar,
    PaceUpdate,
}

impl TransactionType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::LessonProgress => "LESSON_PROGRESS",
            TransactionType::CreateUser => "CREATE_USER",
            TransactionType::SetBookmark => "SET_BOOKMARK",
            TransactionType::AwardStar => "AWARD_STAR",
            TransactionType::PaceUpdate => "PACE_UPDATE",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mempool priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Numeric rank, higher is served first
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A signed ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Canonical hash of the transaction content
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Type-specific payload
    pub data: Value,
    /// Author's compressed public key (hex)
    pub public_key: String,
    /// Creation time in Unix milliseconds
    pub timestamp: i64,
    pub priority: Priority,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
}

/// The fields covered by the transaction id
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContent<'a> {
    #[serde(rename = "type")]
    tx_type: TransactionType,
    data: &'a Value,
    public_key: &'a str,
    timestamp: i64,
    priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<u64>,
}

/// The fields covered by the signature: the content plus the id
#[derive(Serialize)]
pub struct SignedPayload<'a> {
    id: &'a str,
    #[serde(flatten)]
    content: TransactionContent<'a>,
}

impl Transaction {
    /// Borrow the id-covered content
    pub fn content(&self) -> TransactionContent<'_> {
        TransactionContent {
            tx_type: self.tx_type,
            data: &self.data,
            public_key: &self.public_key,
            timestamp: self.timestamp,
            priority: self.priority,
            nonce: self.nonce,
            gas: self.gas,
        }
    }

    /// Recompute the id from the content
    pub fn compute_id(&self) -> String {
        hash(&self.content())
    }

    /// Borrow the signature-covered payload
    pub fn signed_payload(&self) -> SignedPayload<'_> {
        SignedPayload {
            id: &self.id,
            content: self.content(),
        }
    }

    /// Content hash of the whole transaction, signature included
    ///
    /// This is the value proof-of-access pointers and Merkle leaves use.
    pub fn hash(&self) -> String {
        hash(self)
    }

    /// The `lessonId` field of the payload, if it is a string
    pub fn lesson_id(&self) -> Option<&str> {
        self.data.get("lessonId").and_then(Value::as_str)
    }

    pub fn is_lesson_progress(&self) -> bool {
        self.tx_type == TransactionType::LessonProgress
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder that produces signed transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    tx_type: TransactionType,
    data: Value,
    priority: Priority,
    timestamp: Option<i64>,
    nonce: Option<u64>,
    gas: Option<u64>,
}

impl TransactionBuilder {
    pub fn new(tx_type: TransactionType, data: Value) -> Self {
        Self {
            tx_type,
            data,
            priority: Priority::default(),
            timestamp: None,
            nonce: None,
            gas: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the creation time (defaults to now)
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    /// Compute the id and sign with `keys`
    pub fn sign(self, keys: &KeyPair) -> Transaction {
        let mut tx = Transaction {
            id: String::new(),
            tx_type: self.tx_type,
            data: self.data,
            public_key: keys.public_key_hex(),
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            priority: self.priority,
            signature: String::new(),
            nonce: self.nonce,
            gas: self.gas,
        };
        tx.id = tx.compute_id();
        tx.signature = keys.sign(&tx.signed_payload());
        tx
    }
}
