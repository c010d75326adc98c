//! Penalty box
//!
//! Temporary score-multiplier demotions for proposers whose blocks failed
//! verification. One entry per public key; expired entries are reaped
//! lazily on lookup or in bulk by a sweep.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An active (or not yet reaped) penalty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyBoxEntry {
    pub public_key: String,
    pub score_multiplier: f64,
    /// Expiry in Unix milliseconds
    pub expiry_timestamp: i64,
}

impl PenaltyBoxEntry {
    pub fn is_active(&self, now: i64) -> bool {
        self.expiry_timestamp > now
    }
}

/// Penalty entries keyed by public key
#[derive(Debug, Default)]
pub struct PenaltyBox {
    entries: HashMap<String, PenaltyBoxEntry>,
}

impl PenaltyBox {
    pub fn from_entries(entries: Vec<PenaltyBoxEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.public_key.clone(), e))
                .collect(),
        }
    }

    /// Insert or replace the entry for its key
    pub fn upsert(&mut self, entry: PenaltyBoxEntry) {
        self.entries.insert(entry.public_key.clone(), entry);
    }

    pub fn get(&self, public_key: &str) -> Option<&PenaltyBoxEntry> {
        self.entries.get(public_key)
    }

    /// Delete the entry for `public_key` if it is no longer active
    ///
    /// Returns whether an entry was removed.
    pub fn reap_if_expired(&mut self, public_key: &str, now: i64) -> bool {
        match self.entries.get(public_key) {
            Some(entry) if !entry.is_active(now) => {
                self.entries.remove(public_key);
                true
            }
            _ => false,
        }
    }

    /// Remove every entry with `expiry_timestamp < now`
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expiry_timestamp >= now);
        before - self.entries.len()
    }

    /// Entries sorted by key, for persistence and display
    pub fn entries(&self) -> Vec<&PenaltyBoxEntry> {
        let mut entries: Vec<&PenaltyBoxEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, expiry: i64) -> PenaltyBoxEntry {
        PenaltyBoxEntry {
            public_key: key.to_string(),
            score_multiplier: 0.5,
            expiry_timestamp: expiry,
        }
    }

    #[test]
    fn test_reap_only_expired() {
        let mut penalties = PenaltyBox::default();
        penalties.upsert(entry("a", 1_000));

        assert!(!penalties.reap_if_expired("a", 999));
        assert!(penalties.reap_if_expired("a", 1_000));
        assert!(penalties.get("a").is_none());
        assert!(!penalties.reap_if_expired("a", 2_000));
    }

    #[test]
    fn test_sweep_counts_removed() {
        let mut penalties = PenaltyBox::from_entries(vec![
            entry("a", 100),
            entry("b", 200),
            entry("c", 300),
        ]);
        assert_eq!(penalties.sweep(250), 2);
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties.sweep(250), 0);
    }

    #[test]
    fn test_upsert_replaces() {
        let mut penalties = PenaltyBox::default();
        penalties.upsert(entry("a", 100));
        penalties.upsert(entry("a", 500));
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties.get("a").map(|e| e.expiry_timestamp), Some(500));
    }
}
