//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - Canonical JSON hashing (SHA-256)
//! - ECDSA key management (secp256k1)
//! - Merkle root accumulation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{canonical_json, hash, hash_digest, is_hex_digest, sha256, sha256_hex, HASH_HEX_LEN};
pub use keys::{generate_key_pair, public_key_from_hex, sign, verify, KeyError, KeyPair};
pub use merkle::merkle_root;
