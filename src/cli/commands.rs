//! CLI commands for the ledger
//!
//! Offline inspection of a node's data directory. The running node is
//! started from `main.rs`.

use crate::config::LedgerConfig;
use crate::consensus::{ConsensusEngine, ConsensusError};
use crate::core::{Block, PuzzleBank};
use crate::crypto::KeyPair;
use crate::service::compute_leaderboard;
use crate::storage::ChainStore;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub config: LedgerConfig,
    pub store: ChainStore,
}

impl AppState {
    /// Open the store named by `config`
    pub fn new(config: LedgerConfig) -> CliResult<Self> {
        let store = ChainStore::open(config.storage_config())?;
        if store.height().is_none() {
            println!("⚠️  No blocks in {:?} yet; start the node to create genesis", config.data_dir);
        }
        Ok(Self { config, store })
    }
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Create (or show) the node key
pub fn cmd_keygen(path: &Path) -> CliResult<()> {
    let existed = path.exists();
    let keys = KeyPair::load_or_generate(path)?;

    if existed {
        println!("🔑 Existing node key at {:?}", path);
    } else {
        println!("🔑 New node key written to {:?}", path);
    }
    println!("   └─ Public key: {}", keys.public_key_hex());
    Ok(())
}

/// Display chain statistics
pub fn cmd_chain_info(state: &AppState) -> CliResult<()> {
    let stats = state.store.stats();
    let latest = state
        .store
        .get_latest_block()
        .and_then(Block::hash)
        .unwrap_or("-");

    println!("⛓️  Ledger Info");
    println!("   ├─ Network: {}", state.config.network_id);
    match stats.height {
        Some(height) => println!("   ├─ Height: {}", height),
        None => println!("   ├─ Height: -"),
    }
    println!("   ├─ Blocks: {}", stats.block_count);
    println!("   ├─ Pending transactions: {}", stats.mempool_size);
    println!("   ├─ Penalties: {}", stats.penalty_count);
    println!("   └─ Latest hash: {}", latest);

    Ok(())
}

/// List recent blocks
pub fn cmd_chain_blocks(state: &AppState, count: u64) -> CliResult<()> {
    println!("🧱 Recent blocks:");
    for block in state.store.blocks_descending().take(count as usize) {
        println!(
            "   #{} | {} | {} tx | answer {} | {}",
            block.height(),
            short(block.hash().unwrap_or("-")),
            block.transactions.len(),
            block.header.nonce,
            format_millis(block.header.timestamp)
        );
    }

    Ok(())
}

/// Re-verify every block after genesis against the chain before it
///
/// Returns the number of blocks checked, or the height and reason of the
/// first failure.
pub fn verify_chain(
    store: &ChainStore,
    engine: &ConsensusEngine,
) -> Result<u64, (u64, ConsensusError)> {
    let mut replay = ChainStore::in_memory();
    let mut checked = 0;

    for height in 0..=store.height().unwrap_or(0) {
        let Some(block) = store.get_block_by_height(height) else {
            return Err((height, ConsensusError::EmptyChain));
        };
        if height == 0 {
            if block != &Block::genesis() {
                return Err((0, ConsensusError::PreviousHashMismatch));
            }
        } else {
            engine
                .check_proposal(block, &replay)
                .map_err(|e| (height, e))?;
        }
        replay
            .add_block(block.clone())
            .map_err(|e| (height, ConsensusError::Store(e)))?;
        checked += 1;
    }

    Ok(checked)
}

/// Validate the stored chain
pub fn cmd_validate(state: &AppState) -> CliResult<()> {
    println!("🔍 Validating ledger...");

    let bank = PuzzleBank::load(&state.config.puzzle_bank)?;
    let engine = ConsensusEngine::new(state.config.consensus.clone(), Arc::new(bank));

    match verify_chain(&state.store, &engine) {
        Ok(count) => {
            println!("✅ Ledger is valid!");
            println!("   {} blocks verified", count);
        }
        Err((height, e)) => {
            println!("❌ Ledger validation FAILED at height {}!", height);
            println!("   {}", e);
        }
    }

    Ok(())
}

/// Show mempool status
pub fn cmd_mempool(state: &AppState) -> CliResult<()> {
    let mempool = state.store.mempool();
    println!("📬 Mempool Status");
    println!("   Pending transactions: {}", mempool.len());

    if !mempool.is_empty() {
        println!("\n   Transactions:");
        for entry in mempool.entries().iter().take(10) {
            println!(
                "   └─ {} ({}, {:?})",
                short(&entry.transaction.id),
                entry.transaction.tx_type,
                entry.priority
            );
        }
    }

    Ok(())
}

/// Show the penalty box, reaping expired entries first
pub fn cmd_penalties(state: &mut AppState) -> CliResult<()> {
    let reaped = state.store.cleanup_expired_penalties()?;
    if reaped > 0 {
        println!("🧹 Removed {} expired penalties", reaped);
    }

    let penalties = state.store.penalties();
    println!("🚫 Penalty box: {} active", penalties.len());
    for entry in penalties {
        println!(
            "   └─ {} x{} until {}",
            short(&entry.public_key),
            entry.score_multiplier,
            format_millis(entry.expiry_timestamp)
        );
    }

    Ok(())
}

/// Show the learner leaderboard
pub fn cmd_leaderboard(state: &mut AppState, count: usize) -> CliResult<()> {
    let board = compute_leaderboard(&mut state.store);
    println!("🏆 Leaderboard");
    for (rank, entry) in board.iter().take(count).enumerate() {
        println!(
            "   {}. {} | {} lessons | {} stars | score {:.1}",
            rank + 1,
            entry.username.as_deref().unwrap_or(short(&entry.public_key)),
            entry.lessons_completed,
            entry.stars,
            entry.score
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusConfig;
    use crate::core::{QuizQuestion, TransactionBuilder, TransactionType};
    use serde_json::json;

    fn engine() -> ConsensusEngine {
        let question = QuizQuestion {
            question_id: "q1".into(),
            lesson_id: "l1".into(),
            question_text: "?".into(),
            answers: ["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer_index: 2,
        };
        ConsensusEngine::new(
            ConsensusConfig::default(),
            Arc::new(PuzzleBank::new(1, vec![question]).unwrap()),
        )
    }

    fn chain(engine: &ConsensusEngine, answer: u64) -> ChainStore {
        let keys = KeyPair::generate();
        let tx = TransactionBuilder::new(TransactionType::LessonProgress, json!({"lessonId": "l1"}))
            .sign(&keys);
        let genesis = Block::genesis();
        let mut block = engine.propose_block(vec![tx.clone()], &genesis, answer, tx.hash());
        block.attest(&keys);

        let mut store = ChainStore::in_memory();
        store.add_block(genesis).unwrap();
        store.add_block(block).unwrap();
        store
    }

    #[test]
    fn test_verify_chain() {
        let engine = engine();
        assert_eq!(verify_chain(&chain(&engine, 2), &engine).unwrap(), 2);

        let (height, e) = verify_chain(&chain(&engine, 1), &engine).unwrap_err();
        assert_eq!(height, 1);
        assert!(matches!(e, ConsensusError::WrongAnswer));
    }

    #[test]
    fn test_verify_empty_chain() {
        assert_eq!(verify_chain(&ChainStore::in_memory(), &engine()).unwrap_err().0, 0);
    }
}
