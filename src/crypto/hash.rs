//! Canonical hashing utilities for the ledger
//!
//! Every content address in the ledger (transaction ids, block hashes,
//! proof-of-access pointers, Merkle nodes) is the SHA-256 of the canonical
//! JSON form of a value. Canonical means: object keys sorted
//! lexicographically at every depth, no insignificant whitespace.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Serialize a value into its canonical JSON string
pub fn canonical_json<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(data)?;
    serde_json::to_string(&canonicalize(value))
}

/// Hash a value by its canonical JSON form
///
/// Values that cannot be represented as JSON (maps with non-string keys)
/// hash as `null`; none of the ledger's own types hit that path.
pub fn hash<T: Serialize + ?Sized>(data: &T) -> String {
    let json = canonical_json(data).unwrap_or_else(|_| "null".to_string());
    sha256_hex(json.as_bytes())
}

/// Raw 32-byte digest of the canonical form, used as the signing message
pub fn hash_digest<T: Serialize + ?Sized>(data: &T) -> [u8; 32] {
    let json = canonical_json(data).unwrap_or_else(|_| "null".to_string());
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hasher.finalize().into()
}

/// Check that a string is a lowercase or uppercase hex SHA-256 digest
pub fn is_hex_digest(value: &str) -> bool {
    value.len() == HASH_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
