//! Ledger persistence layer
//!
//! Blocks are appended to a JSON-lines file, since they are immutable once
//! stored. The small mutable tables (mempool, app state, penalty box) are
//! rewritten whole through a temporary file and an atomic rename.

use crate::core::Block;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Block has no hash")]
    MissingBlockHash,
    #[error("Block {0} already stored")]
    DuplicateBlock(String),
    #[error("Height {0} already occupied")]
    HeightOccupied(u64),
    #[error("Transaction {0} already in mempool")]
    DuplicateTransaction(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub blocks_file: String,
    pub mempool_file: String,
    pub app_state_file: String,
    pub penalty_box_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".pok_data"),
            blocks_file: "blocks.jsonl".to_string(),
            mempool_file: "mempool.json".to_string(),
            app_state_file: "app_state.json".to_string(),
            penalty_box_file: "penalty_box.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

/// The rewritable tables
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Mempool,
    AppState,
    PenaltyBox,
}

/// File-backed table storage
#[derive(Debug)]
pub struct TableFiles {
    config: StorageConfig,
}

impl TableFiles {
    pub fn new(config: StorageConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn blocks_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.blocks_file)
    }

    fn table_path(&self, table: Table) -> PathBuf {
        let name = match table {
            Table::Mempool => &self.config.mempool_file,
            Table::AppState => &self.config.app_state_file,
            Table::PenaltyBox => &self.config.penalty_box_file,
        };
        self.config.data_dir.join(name)
    }

    /// Append one block to the block log
    pub fn append_block(&self, block: &Block) -> Result<(), StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.blocks_path())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, block)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Read every block from the block log, in append order
    pub fn load_blocks(&self) -> Result<Vec<Block>, StoreError> {
        let path = self.blocks_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut blocks = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            blocks.push(serde_json::from_str(&line)?);
        }
        Ok(blocks)
    }

    /// Rewrite a table atomically
    pub fn save_table<T: Serialize + ?Sized>(&self, table: Table, value: &T) -> Result<(), StoreError> {
        let path = self.table_path(table);
        let temp_path = path.with_extension("tmp");

        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Load a table, or its default when the file does not exist yet
    pub fn load_table<T: DeserializeOwned + Default>(&self, table: Table) -> Result<T, StoreError> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(T::default());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
