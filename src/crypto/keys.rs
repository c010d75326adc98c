//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. Keys travel as hex: 33-byte compressed
//! public keys and 32-byte secret keys. Signatures are 64-byte compact
//! ECDSA signatures over the canonical hash of the signed value.

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::hash::hash_digest;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Key file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Key file public key does not match its private key")]
    MismatchedKeyFile,
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// On-disk form of the node key
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    public_key: String,
    private_key: String,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let secret_key = secret_key_from_hex(hex_key)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Load the node key from `path`, generating and saving one on first run
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        if path.exists() {
            let file: KeyFile = serde_json::from_slice(&fs::read(path)?)?;
            let pair = Self::from_private_key_hex(&file.private_key)?;
            if pair.public_key_hex() != file.public_key {
                return Err(KeyError::MismatchedKeyFile);
            }
            return Ok(pair);
        }

        let pair = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = KeyFile {
            public_key: pair.public_key_hex(),
            private_key: pair.private_key_hex(),
        };
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        log::info!("Generated node key {}", file.public_key);
        Ok(pair)
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Sign the canonical hash of `data`
    pub fn sign<T: Serialize + ?Sized>(&self, data: &T) -> String {
        sign_with_key(data, &self.secret_key)
    }
}

/// Generate a fresh key pair
pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

fn secret_key_from_hex(hex_key: &str) -> Result<SecretKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
    SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)
}

fn sign_with_key<T: Serialize + ?Sized>(data: &T, secret_key: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(hash_digest(data));
    let signature = secp.sign_ecdsa(&message, secret_key);
    hex::encode(signature.serialize_compact())
}

/// Sign the canonical hash of `data` with a hex-encoded private key
pub fn sign<T: Serialize + ?Sized>(data: &T, private_key_hex: &str) -> Result<String, KeyError> {
    let secret_key = secret_key_from_hex(private_key_hex)?;
    Ok(sign_with_key(data, &secret_key))
}

/// Verify a hex signature over the canonical hash of `data`
///
/// Returns `false` for malformed hex, keys or signatures as well as for a
/// genuine mismatch.
pub fn verify<T: Serialize + ?Sized>(signature_hex: &str, data: &T, public_key_hex: &str) -> bool {
    let Ok(public_key) = public_key_from_hex(public_key_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_compact(&sig_bytes) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(hash_digest(data));
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert_eq!(kp.public_key_hex().len(), 66);
    }

    #[test]
    fn test_generated_pairs_are_distinct() {
        let a = generate_key_pair();
        let b = generate_key_pair();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
        assert_ne!(a.private_key_hex(), b.private_key_hex());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message = json!({"lessonId": "intro-1"});

        let signature = sign(&message, &kp.private_key_hex()).unwrap();
        assert!(verify(&signature, &message, &kp.public_key_hex()));
        assert_eq!(signature, kp.sign(&message));
    }

    #[test]
    fn test_verify_rejects_alterations() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let message = json!({"lessonId": "intro-1"});
        let signature = kp.sign(&message);

        assert!(!verify(&signature, &json!({"lessonId": "intro-2"}), &kp.public_key_hex()));
        assert!(!verify(&signature, &message, &other.public_key_hex()));

        let mut tampered = hex::decode(&signature).unwrap();
        tampered[10] ^= 0x01;
        assert!(!verify(&hex::encode(tampered), &message, &kp.public_key_hex()));
    }

    #[test]
    fn test_verify_never_fails_on_garbage() {
        let kp = KeyPair::generate();
        assert!(!verify("zz", "data", &kp.public_key_hex()));
        assert!(!verify(&kp.sign("data"), "data", "not-a-key"));
        assert!(!verify("", "data", ""));
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert!(KeyPair::from_private_key_hex("1234").is_err());
    }

    #[test]
    fn test_load_or_generate_persists_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_key.json");

        let first = KeyPair::load_or_generate(&path).unwrap();
        let second = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }
}
