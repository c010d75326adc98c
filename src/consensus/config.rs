use serde::{Deserialize, Serialize};

use crate::core::DEFAULT_DIFFICULTY;

/// Multiplier applied to a proposer whose block failed verification
pub const DEFAULT_PENALTY_MULTIPLIER: f64 = 0.5;

/// How long a penalty lasts (10 minutes)
pub const DEFAULT_PENALTY_DURATION_MS: i64 = 10 * 60 * 1000;

/// Consensus configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsensusConfig {
    /// Difficulty written into every proposed header.
    pub difficulty: u32,
    /// Score multiplier recorded for a failed proposer.
    pub penalty_multiplier: f64,
    /// Penalty length in milliseconds; repeated failures extend it.
    pub penalty_duration_ms: i64,
    /// Most mempool transactions taken into one proposal.
    pub max_block_txs: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            penalty_multiplier: DEFAULT_PENALTY_MULTIPLIER,
            penalty_duration_ms: DEFAULT_PENALTY_DURATION_MS,
            max_block_txs: 500,
        }
    }
}
