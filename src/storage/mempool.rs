//! Transaction pool (mempool) for pending transactions
//!
//! Holds unconfirmed transactions until they are included in a block or
//! cleared. Reads are served in priority order
//! (critical > high > normal > low) and, within one priority, earliest
//! arrival first.

use crate::core::{now_millis, Priority, Transaction};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Ordering key: highest rank first, then lowest arrival sequence
type OrderKey = (Reverse<u8>, u64);

/// Entry in the mempool with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolEntry {
    pub transaction: Transaction,
    pub priority: Priority,
    /// Wall-clock arrival time (Unix milliseconds)
    pub arrival_time: i64,
    /// Monotonic arrival counter, the FIFO tie-break
    pub arrival_seq: u64,
}

impl MempoolEntry {
    fn order_key(&self) -> OrderKey {
        (Reverse(self.priority.rank()), self.arrival_seq)
    }
}

/// Memory pool for pending transactions
#[derive(Debug, Default)]
pub struct Mempool {
    /// Entries indexed by transaction id
    entries: HashMap<String, MempoolEntry>,
    /// Transaction ids in serving order
    order: BTreeMap<OrderKey, String>,
    next_seq: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a pool from persisted entries
    pub fn from_entries(entries: Vec<MempoolEntry>) -> Self {
        let mut pool = Self::new();
        for entry in entries {
            pool.next_seq = pool.next_seq.max(entry.arrival_seq + 1);
            pool.order.insert(entry.order_key(), entry.transaction.id.clone());
            pool.entries.insert(entry.transaction.id.clone(), entry);
        }
        pool
    }

    /// Add a transaction; returns `false` if its id is already pooled
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.entries.contains_key(&tx.id) {
            return false;
        }

        let entry = MempoolEntry {
            priority: tx.priority,
            arrival_time: now_millis(),
            arrival_seq: self.next_seq,
            transaction: tx,
        };
        self.next_seq += 1;

        let id = entry.transaction.id.clone();
        self.order.insert(entry.order_key(), id.clone());
        self.entries.insert(id, entry);
        true
    }

    /// Remove a transaction from the pool
    pub fn remove(&mut self, tx_id: &str) -> Option<Transaction> {
        let entry = self.entries.remove(tx_id)?;
        self.order.remove(&entry.order_key());
        Some(entry.transaction)
    }

    /// Up to `limit` transactions in serving order
    pub fn ordered(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .values()
            .take(limit)
            .filter_map(|id| self.entries.get(id).map(|e| e.transaction.clone()))
            .collect()
    }

    /// All entries in serving order
    pub fn entries(&self) -> Vec<&MempoolEntry> {
        self.order
            .values()
            .filter_map(|id| self.entries.get(id))
            .collect()
    }

    pub fn get(&self, tx_id: &str) -> Option<&MempoolEntry> {
        self.entries.get(tx_id)
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
