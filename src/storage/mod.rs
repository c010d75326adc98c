//! Storage module: blocks, mempool, penalty box and app state

pub mod chain_store;
pub mod mempool;
pub mod penalty;
pub mod persistence;

pub use chain_store::{ChainStore, StoreStats};
pub use mempool::{Mempool, MempoolEntry};
pub use penalty::{PenaltyBox, PenaltyBoxEntry};
pub use persistence::{StorageConfig, StoreError, Table, TableFiles};
