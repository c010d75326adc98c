//! Per-type payload schemas
//!
//! These layer field-shape rules for each transaction type on top of the
//! generic transaction checks.

use crate::core::{Transaction, TransactionType};
use serde_json::Value;

use super::rules::validate_transaction;
use super::ValidationError;

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 64;

/// Length of a hex-encoded compressed public key
pub const PUBLIC_KEY_HEX_LEN: usize = 66;

fn schema_error(tx: &Transaction, reason: impl Into<String>) -> ValidationError {
    ValidationError::Schema(tx.tx_type, reason.into())
}

fn required_str<'a>(tx: &'a Transaction, field: &str) -> Result<&'a str, ValidationError> {
    match tx.data.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(schema_error(tx, format!("{field} is empty"))),
        None => Err(schema_error(tx, format!("{field} must be a string"))),
    }
}

fn optional<'a>(tx: &'a Transaction, field: &str) -> Option<&'a Value> {
    tx.data.get(field).filter(|v| !v.is_null())
}

fn validate_lesson_progress(tx: &Transaction) -> Result<(), ValidationError> {
    required_str(tx, "lessonId")?;
    if let Some(completed) = optional(tx, "completed") {
        if !completed.is_boolean() {
            return Err(schema_error(tx, "completed must be a boolean"));
        }
    }
    if let Some(score) = optional(tx, "score") {
        match score.as_f64() {
            Some(s) if (0.0..=100.0).contains(&s) => {}
            _ => return Err(schema_error(tx, "score must be a number in 0..=100")),
        }
    }
    Ok(())
}

fn validate_create_user(tx: &Transaction) -> Result<(), ValidationError> {
    let username = required_str(tx, "username")?;
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(schema_error(tx, "username too long"));
    }
    Ok(())
}

fn validate_set_bookmark(tx: &Transaction) -> Result<(), ValidationError> {
    required_str(tx, "lessonId")?;
    if let Some(position) = optional(tx, "position") {
        if position.as_u64().is_none() {
            return Err(schema_error(tx, "position must be a non-negative integer"));
        }
    }
    Ok(())
}

fn validate_award_star(tx: &Transaction) -> Result<(), ValidationError> {
    let recipient = required_str(tx, "recipientPublicKey")?;
    if recipient.len() != PUBLIC_KEY_HEX_LEN || !recipient.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(schema_error(tx, "recipientPublicKey must be a compressed hex key"));
    }
    required_str(tx, "lessonId")?;
    Ok(())
}

fn validate_pace_update(tx: &Transaction) -> Result<(), ValidationError> {
    match tx.data.get("lessonsPerWeek").and_then(Value::as_f64) {
        Some(pace) if pace >= 0.0 => Ok(()),
        _ => Err(schema_error(tx, "lessonsPerWeek must be a non-negative number")),
    }
}

/// Payload shape for the transaction's type
pub fn validate_schema(tx: &Transaction) -> Result<(), ValidationError> {
    match tx.tx_type {
        TransactionType::LessonProgress => validate_lesson_progress(tx),
        TransactionType::CreateUser => validate_create_user(tx),
        TransactionType::SetBookmark => validate_set_bookmark(tx),
        TransactionType::AwardStar => validate_award_star(tx),
        TransactionType::PaceUpdate => validate_pace_update(tx),
    }
}

/// Generic checks followed by the type's schema
pub fn validate_typed_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    validate_transaction(tx)?;
    validate_schema(tx)
}

pub fn is_transaction_schema_valid(tx: &Transaction) -> bool {
    validate_typed_transaction(tx).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransactionBuilder;
    use crate::crypto::KeyPair;
    use serde_json::json;

    fn signed(tx_type: TransactionType, data: Value) -> Transaction {
        TransactionBuilder::new(tx_type, data).sign(&KeyPair::generate())
    }

    #[test]
    fn test_lesson_progress_schema() {
        assert!(is_transaction_schema_valid(&signed(
            TransactionType::LessonProgress,
            json!({"lessonId": "l1", "completed": true, "score": 80})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::LessonProgress,
            json!({"lessonId": ""})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::LessonProgress,
            json!({"lessonId": "l1", "score": 101})
        )));
    }

    #[test]
    fn test_create_user_schema() {
        assert!(is_transaction_schema_valid(&signed(
            TransactionType::CreateUser,
            json!({"username": "ada"})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::CreateUser,
            json!({"username": "x".repeat(MAX_USERNAME_LEN + 1)})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::CreateUser,
            json!({"name": "ada"})
        )));
    }

    #[test]
    fn test_bookmark_and_pace_schema() {
        assert!(is_transaction_schema_valid(&signed(
            TransactionType::SetBookmark,
            json!({"lessonId": "l1", "position": 3})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::SetBookmark,
            json!({"lessonId": "l1", "position": -3})
        )));
        assert!(is_transaction_schema_valid(&signed(
            TransactionType::PaceUpdate,
            json!({"lessonsPerWeek": 2.5})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::PaceUpdate,
            json!({"lessonsPerWeek": "fast"})
        )));
    }

    #[test]
    fn test_award_star_schema() {
        let recipient = KeyPair::generate().public_key_hex();
        assert!(is_transaction_schema_valid(&signed(
            TransactionType::AwardStar,
            json!({"recipientPublicKey": recipient, "lessonId": "l1"})
        )));
        assert!(!is_transaction_schema_valid(&signed(
            TransactionType::AwardStar,
            json!({"recipientPublicKey": "abcd", "lessonId": "l1"})
        )));
    }

    #[test]
    fn test_schema_runs_after_signature_check() {
        let mut tx = signed(TransactionType::CreateUser, json!({"username": "ada"}));
        tx.signature = "00".repeat(64);
        assert!(matches!(
            validate_typed_transaction(&tx),
            Err(ValidationError::BadSignature)
        ));
    }
}
