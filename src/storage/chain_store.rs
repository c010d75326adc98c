//! Durable local ledger state
//!
//! The [`ChainStore`] owns four tables: blocks (indexed by hash and by
//! height), the mempool, a key-value app state and the penalty box. With a
//! data directory every mutation is written through before it returns;
//! [`ChainStore::in_memory`] keeps everything in process.

use crate::core::{now_millis, Block, Transaction};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::mempool::{Mempool, MempoolEntry};
use super::penalty::{PenaltyBox, PenaltyBoxEntry};
use super::persistence::{StorageConfig, StoreError, Table, TableFiles};

/// Local ledger state
#[derive(Debug, Default)]
pub struct ChainStore {
    files: Option<TableFiles>,
    /// Blocks in insertion order
    blocks: Vec<Block>,
    by_hash: HashMap<String, usize>,
    by_height: BTreeMap<u64, usize>,
    /// Confirmed transaction id to block height
    by_tx_id: HashMap<String, u64>,
    mempool: Mempool,
    app_state: BTreeMap<String, Value>,
    penalties: PenaltyBox,
}

impl ChainStore {
    /// A store with no durability
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a store under `config.data_dir`
    pub fn open(config: StorageConfig) -> Result<Self, StoreError> {
        let files = TableFiles::new(config)?;

        let mut store = Self::default();
        for block in files.load_blocks()? {
            store.index_block(block)?;
        }
        let mempool: Vec<MempoolEntry> = files.load_table(Table::Mempool)?;
        store.mempool = Mempool::from_entries(mempool);
        store.app_state = files.load_table(Table::AppState)?;
        let penalties: Vec<PenaltyBoxEntry> = files.load_table(Table::PenaltyBox)?;
        store.penalties = PenaltyBox::from_entries(penalties);
        store.files = Some(files);

        log::info!(
            "Opened chain store: {} blocks, {} pending transactions",
            store.blocks.len(),
            store.mempool.len()
        );
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.files.is_some()
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Append a sealed block
    ///
    /// Blocks are never overwritten: a repeated hash or an occupied height
    /// is an error.
    pub fn add_block(&mut self, block: Block) -> Result<(), StoreError> {
        let hash = block.hash().ok_or(StoreError::MissingBlockHash)?;
        if self.by_hash.contains_key(hash) {
            return Err(StoreError::DuplicateBlock(hash.to_string()));
        }
        if self.by_height.contains_key(&block.height()) {
            return Err(StoreError::HeightOccupied(block.height()));
        }

        if let Some(files) = &self.files {
            files.append_block(&block)?;
        }
        self.index_block(block)
    }

    fn index_block(&mut self, block: Block) -> Result<(), StoreError> {
        let hash = block
            .hash()
            .ok_or(StoreError::MissingBlockHash)?
            .to_string();
        let position = self.blocks.len();
        self.by_hash.insert(hash, position);
        self.by_height.insert(block.height(), position);
        for tx in &block.transactions {
            self.by_tx_id.entry(tx.id.clone()).or_insert(block.height());
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.by_hash.get(hash).map(|&i| &self.blocks[i])
    }

    pub fn get_block_by_height(&self, height: u64) -> Option<&Block> {
        self.by_height.get(&height).map(|&i| &self.blocks[i])
    }

    /// The block with the greatest height
    pub fn get_latest_block(&self) -> Option<&Block> {
        self.by_height
            .values()
            .next_back()
            .map(|&i| &self.blocks[i])
    }

    /// Blocks with `from <= height <= to`, ascending
    pub fn get_blocks_by_height_range(&self, from: u64, to: u64) -> Vec<&Block> {
        if from > to {
            return Vec::new();
        }
        self.by_height
            .range(from..=to)
            .map(|(_, &i)| &self.blocks[i])
            .collect()
    }

    /// Blocks from the tip down to genesis
    pub fn blocks_descending(&self) -> impl Iterator<Item = &Block> {
        self.by_height.values().rev().map(|&i| &self.blocks[i])
    }

    pub fn height(&self) -> Option<u64> {
        self.get_latest_block().map(Block::height)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Height of the block that confirmed `tx_id`
    pub fn confirmed_height(&self, tx_id: &str) -> Option<u64> {
        self.by_tx_id.get(tx_id).copied()
    }

    pub fn is_transaction_confirmed(&self, tx_id: &str) -> bool {
        self.by_tx_id.contains_key(tx_id)
    }

    // =========================================================================
    // Mempool
    // =========================================================================

    /// Pool one transaction; nothing is kept if the write fails
    pub fn add_to_mempool(&mut self, tx: Transaction) -> Result<(), StoreError> {
        let id = tx.id.clone();
        if !self.mempool.insert(tx) {
            return Err(StoreError::DuplicateTransaction(id));
        }
        if let Err(e) = self.persist_mempool() {
            self.mempool.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Pool several transactions with a single write, skipping ids already
    /// pooled. Returns how many were added; on a failed write none are kept.
    pub fn add_many_to_mempool(&mut self, txs: Vec<Transaction>) -> Result<usize, StoreError> {
        let mut added = Vec::new();
        for tx in txs {
            let id = tx.id.clone();
            if self.mempool.insert(tx) {
                added.push(id);
            }
        }
        if added.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist_mempool() {
            for id in &added {
                self.mempool.remove(id);
            }
            return Err(e);
        }
        Ok(added.len())
    }

    pub fn remove_from_mempool(&mut self, tx_id: &str) -> Result<Option<Transaction>, StoreError> {
        let removed = self.mempool.remove(tx_id);
        if removed.is_some() {
            self.persist_mempool()?;
        }
        Ok(removed)
    }

    /// Remove several transactions with a single write
    pub fn remove_many_from_mempool(&mut self, tx_ids: &[String]) -> Result<usize, StoreError> {
        let removed = tx_ids
            .iter()
            .filter(|id| self.mempool.remove(id).is_some())
            .count();
        if removed > 0 {
            self.persist_mempool()?;
        }
        Ok(removed)
    }

    pub fn clear_mempool(&mut self) -> Result<(), StoreError> {
        self.mempool.clear();
        self.persist_mempool()
    }

    /// Up to `limit` pending transactions, highest priority and oldest first
    pub fn get_transactions_from_mempool(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.ordered(limit)
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn mempool_contains(&self, tx_id: &str) -> bool {
        self.mempool.contains(tx_id)
    }

    fn persist_mempool(&self) -> Result<(), StoreError> {
        match &self.files {
            Some(files) => files.save_table(Table::Mempool, &self.mempool.entries()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Penalty box
    // =========================================================================

    /// The penalty for `public_key` if it has not expired
    ///
    /// An expired entry found here is deleted on the spot.
    pub fn get_active_penalty(&mut self, public_key: &str) -> Option<PenaltyBoxEntry> {
        if self.penalties.reap_if_expired(public_key, now_millis()) {
            log::debug!("Reaped expired penalty for {}", public_key);
            if let Err(e) = self.persist_penalties() {
                log::warn!("Failed to persist penalty reap: {}", e);
            }
            return None;
        }
        self.penalties.get(public_key).cloned()
    }

    pub fn is_penalized(&mut self, public_key: &str) -> bool {
        self.get_active_penalty(public_key).is_some()
    }

    /// Score multiplier: the active penalty's, else 1.0
    pub fn get_score_multiplier(&mut self, public_key: &str) -> f64 {
        self.get_active_penalty(public_key)
            .map(|p| p.score_multiplier)
            .unwrap_or(1.0)
    }

    /// Insert or replace the penalty for `entry.public_key`
    pub fn set_penalty(&mut self, entry: PenaltyBoxEntry) -> Result<(), StoreError> {
        self.penalties.upsert(entry);
        self.persist_penalties()
    }

    /// Delete every entry with an expiry in the past; returns the count
    pub fn cleanup_expired_penalties(&mut self) -> Result<usize, StoreError> {
        let removed = self.penalties.sweep(now_millis());
        if removed > 0 {
            log::info!("Removed {} expired penalties", removed);
            self.persist_penalties()?;
        }
        Ok(removed)
    }

    pub fn penalties(&self) -> Vec<&PenaltyBoxEntry> {
        self.penalties.entries()
    }

    fn persist_penalties(&self) -> Result<(), StoreError> {
        match &self.files {
            Some(files) => files.save_table(Table::PenaltyBox, &self.penalties.entries()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // App state
    // =========================================================================

    pub fn get_app_state(&self, key: &str) -> Option<&Value> {
        self.app_state.get(key)
    }

    /// Last write wins
    pub fn set_app_state(&mut self, key: impl Into<String>, value: Value) -> Result<(), StoreError> {
        self.app_state.insert(key.into(), value);
        match &self.files {
            Some(files) => files.save_table(Table::AppState, &self.app_state),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            block_count: self.blocks.len(),
            height: self.height(),
            mempool_size: self.mempool.len(),
            penalty_count: self.penalties.len(),
            app_state_keys: self.app_state.len(),
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub block_count: usize,
    pub height: Option<u64>,
    pub mempool_size: usize,
    pub penalty_count: usize,
    pub app_state_keys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, Priority, TransactionBuilder, TransactionType};
    use crate::crypto::KeyPair;
    use serde_json::json;

    fn child_of(parent: &Block) -> Block {
        let mut header = BlockHeader {
            previous_hash: parent.hash().unwrap().to_string(),
            height: parent.height() + 1,
            timestamp: parent.header.timestamp + 1,
            hash: None,
            ..parent.header.clone()
        };
        header.seal();
        Block {
            header,
            transactions: Vec::new(),
            attestations: Vec::new(),
        }
    }

    #[test]
    fn test_add_block_requires_hash() {
        let mut store = ChainStore::in_memory();
        let mut block = Block::genesis();
        block.header.hash = None;
        assert!(matches!(store.add_block(block), Err(StoreError::MissingBlockHash)));
    }

    #[test]
    fn test_add_block_never_overwrites() {
        let mut store = ChainStore::in_memory();
        store.add_block(Block::genesis()).unwrap();
        assert!(matches!(
            store.add_block(Block::genesis()),
            Err(StoreError::DuplicateBlock(_))
        ));

        let mut other = Block::genesis();
        other.header.nonce = 3;
        other.header.seal();
        assert!(matches!(store.add_block(other), Err(StoreError::HeightOccupied(0))));
    }

    #[test]
    fn test_block_queries() {
        let mut store = ChainStore::in_memory();
        assert!(store.get_latest_block().is_none());

        let genesis = Block::genesis();
        let b1 = child_of(&genesis);
        let b2 = child_of(&b1);
        store.add_block(genesis.clone()).unwrap();
        store.add_block(b2.clone()).unwrap();
        store.add_block(b1.clone()).unwrap();

        assert_eq!(store.get_latest_block(), Some(&b2));
        assert_eq!(store.get_block_by_hash(b1.hash().unwrap()), Some(&b1));
        let range: Vec<u64> = store
            .get_blocks_by_height_range(1, 2)
            .iter()
            .map(|b| b.height())
            .collect();
        assert_eq!(range, vec![1, 2]);
        assert!(store.get_blocks_by_height_range(2, 1).is_empty());
        let heights: Vec<u64> = store.blocks_descending().map(Block::height).collect();
        assert_eq!(heights, vec![2, 1, 0]);
    }

    #[test]
    fn test_mempool_read_order() {
        let keys = KeyPair::generate();
        let mut store = ChainStore::in_memory();
        let mut ids = Vec::new();
        for (i, p) in [Priority::Low, Priority::High, Priority::Critical, Priority::Normal]
            .into_iter()
            .enumerate()
        {
            let tx = TransactionBuilder::new(TransactionType::LessonProgress, json!({"lessonId": i.to_string()}))
                .priority(p)
                .sign(&keys);
            ids.push(tx.id.clone());
            store.add_to_mempool(tx).unwrap();
        }

        let order: Vec<Priority> = store
            .get_transactions_from_mempool(4)
            .iter()
            .map(|t| t.priority)
            .collect();
        assert_eq!(
            order,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );

        assert!(store.remove_from_mempool(&ids[0]).unwrap().is_some());
        assert_eq!(store.mempool().len(), 3);
        store.clear_mempool().unwrap();
        assert!(store.get_transactions_from_mempool(10).is_empty());
    }

    #[test]
    fn test_penalty_lifecycle() {
        let mut store = ChainStore::in_memory();
        store
            .set_penalty(PenaltyBoxEntry {
                public_key: "peer".to_string(),
                score_multiplier: 0.5,
                expiry_timestamp: now_millis() + 100,
            })
            .unwrap();

        assert!(store.is_penalized("peer"));
        assert_eq!(store.get_score_multiplier("peer"), 0.5);

        std::thread::sleep(std::time::Duration::from_millis(150));
        assert_eq!(store.cleanup_expired_penalties().unwrap(), 1);
        assert!(!store.is_penalized("peer"));
        assert_eq!(store.get_score_multiplier("peer"), 1.0);
    }

    #[test]
    fn test_lazy_reap_on_lookup() {
        let mut store = ChainStore::in_memory();
        store
            .set_penalty(PenaltyBoxEntry {
                public_key: "peer".to_string(),
                score_multiplier: 0.5,
                expiry_timestamp: now_millis() - 1,
            })
            .unwrap();

        assert!(store.get_active_penalty("peer").is_none());
        assert!(store.penalties().is_empty());
    }

    #[test]
    fn test_app_state_last_write_wins() {
        let mut store = ChainStore::in_memory();
        store.set_app_state("theme", json!("dark")).unwrap();
        store.set_app_state("theme", json!({"mode": "light"})).unwrap();
        assert_eq!(store.get_app_state("theme"), Some(&json!({"mode": "light"})));
        assert!(store.get_app_state("missing").is_none());
    }

    #[test]
    fn test_durable_store_reopens() {
        let temp_dir = tempfile::tempdir().unwrap();
        let keys = KeyPair::generate();
        let tx = TransactionBuilder::new(TransactionType::CreateUser, json!({"username": "ada"}))
            .sign(&keys);

        {
            let mut store = ChainStore::open(StorageConfig::with_data_dir(temp_dir.path())).unwrap();
            assert!(store.is_durable());
            store.add_block(Block::genesis()).unwrap();
            store.add_to_mempool(tx.clone()).unwrap();
            store.set_app_state("k", json!(1)).unwrap();
            store
                .set_penalty(PenaltyBoxEntry {
                    public_key: "peer".to_string(),
                    score_multiplier: 0.5,
                    expiry_timestamp: now_millis() + 60_000,
                })
                .unwrap();
        }

        let mut store = ChainStore::open(StorageConfig::with_data_dir(temp_dir.path())).unwrap();
        assert_eq!(store.get_latest_block(), Some(&Block::genesis()));
        assert!(store.mempool_contains(&tx.id));
        assert_eq!(store.get_app_state("k"), Some(&json!(1)));
        assert!(store.is_penalized("peer"));
    }

    #[test]
    fn test_confirmed_transaction_index() {
        let keys = KeyPair::generate();
        let tx = TransactionBuilder::new(TransactionType::CreateUser, json!({"username": "ada"}))
            .sign(&keys);
        let genesis = Block::genesis();
        let mut b1 = child_of(&genesis);
        b1.transactions.push(tx.clone());
        b1.header.seal();

        let mut store = ChainStore::in_memory();
        store.add_block(genesis).unwrap();
        assert!(!store.is_transaction_confirmed(&tx.id));
        store.add_block(b1).unwrap();
        assert!(store.is_transaction_confirmed(&tx.id));
        assert_eq!(store.confirmed_height(&tx.id), Some(1));
        assert_eq!(store.confirmed_height("unknown"), None);
    }

    #[test]
    fn test_add_many_to_mempool_skips_pooled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let keys = KeyPair::generate();
        let txs: Vec<Transaction> = (0..3)
            .map(|i| {
                TransactionBuilder::new(TransactionType::LessonProgress, json!({"lessonId": format!("l{i}")}))
                    .sign(&keys)
            })
            .collect();

        let mut store = ChainStore::open(StorageConfig::with_data_dir(temp_dir.path())).unwrap();
        store.add_to_mempool(txs[0].clone()).unwrap();
        assert_eq!(store.add_many_to_mempool(txs.clone()).unwrap(), 2);
        assert_eq!(store.add_many_to_mempool(Vec::new()).unwrap(), 0);
        drop(store);

        let store = ChainStore::open(StorageConfig::with_data_dir(temp_dir.path())).unwrap();
        assert_eq!(store.mempool().len(), 3);
    }

    #[test]
    fn test_failed_mempool_write_rolls_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("data");
        let keys = KeyPair::generate();
        let tx = TransactionBuilder::new(TransactionType::CreateUser, json!({"username": "ada"}))
            .sign(&keys);
        let other = TransactionBuilder::new(TransactionType::CreateUser, json!({"username": "bob"}))
            .sign(&keys);

        let mut store = ChainStore::open(StorageConfig::with_data_dir(&data_dir)).unwrap();
        std::fs::remove_dir_all(&data_dir).unwrap();

        assert!(store.add_to_mempool(tx.clone()).is_err());
        assert!(!store.mempool_contains(&tx.id));
        assert!(store.add_many_to_mempool(vec![tx, other]).is_err());
        assert!(store.mempool().is_empty());
    }
}
