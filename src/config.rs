//! Top-level configuration for a ledger node.
//!
//! `LedgerConfig` gathers the network, storage and consensus settings. It
//! can be read from a JSON file (missing fields take their defaults) and the
//! binary overrides individual fields from command-line flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::consensus::ConsensusConfig;
use crate::storage::StorageConfig;

/// Key file name used when no explicit path is configured
pub const DEFAULT_KEY_FILE: &str = "node_key.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one ledger node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Nodes only talk to peers with the same network id.
    pub network_id: String,
    /// Address the peer server binds to.
    pub listen_addr: String,
    /// Address advertised to peers in handshakes, if reachable.
    pub advertised_addr: Option<String>,
    /// Peers dialled at startup.
    pub bootstrap_peers: Vec<String>,
    pub data_dir: PathBuf,
    /// Node key file; defaults to `node_key.json` in the data directory.
    pub key_file: Option<PathBuf>,
    /// Puzzle bank JSON file.
    pub puzzle_bank: PathBuf,
    /// How long a proposal waits for competing announcements.
    pub announce_window_ms: u64,
    /// Silent connections are closed after this long.
    pub idle_timeout_secs: u64,
    /// Interval between handshake refreshes to every peer.
    pub hello_interval_secs: u64,
    /// Interval between expired-penalty sweeps.
    pub penalty_sweep_secs: u64,
    pub consensus: ConsensusConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network_id: "pok-main".to_string(),
            listen_addr: "0.0.0.0:7400".to_string(),
            advertised_addr: None,
            bootstrap_peers: Vec::new(),
            data_dir: PathBuf::from(".pok_data"),
            key_file: None,
            puzzle_bank: PathBuf::from("puzzles.json"),
            announce_window_ms: 2_000,
            idle_timeout_secs: 120,
            hello_interval_secs: 30,
            penalty_sweep_secs: 60,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Read a config file and check it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: LedgerConfig = serde_json::from_slice(&fs::read(path)?)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_id.trim().is_empty() {
            return Err(ConfigError::Invalid("networkId is empty".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idleTimeoutSecs must be positive".into()));
        }
        if self.hello_interval_secs == 0 || self.hello_interval_secs >= self.idle_timeout_secs {
            return Err(ConfigError::Invalid(
                "helloIntervalSecs must be positive and below idleTimeoutSecs".into(),
            ));
        }
        if self.penalty_sweep_secs == 0 {
            return Err(ConfigError::Invalid("penaltySweepSecs must be positive".into()));
        }
        let multiplier = self.consensus.penalty_multiplier;
        if !(0.0..=1.0).contains(&multiplier) {
            return Err(ConfigError::Invalid(format!(
                "penaltyMultiplier {} outside 0..=1",
                multiplier
            )));
        }
        if self.consensus.penalty_duration_ms <= 0 {
            return Err(ConfigError::Invalid("penaltyDurationMs must be positive".into()));
        }
        if self.consensus.max_block_txs == 0 {
            return Err(ConfigError::Invalid("maxBlockTxs must be positive".into()));
        }
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::with_data_dir(&self.data_dir)
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_KEY_FILE))
    }

    pub fn announce_window(&self) -> Duration {
        Duration::from_millis(self.announce_window_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_secs(self.hello_interval_secs)
    }

    pub fn penalty_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.penalty_sweep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.key_path(), PathBuf::from(".pok_data").join(DEFAULT_KEY_FILE));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"{"networkId": "pok-test", "bootstrapPeers": ["10.0.0.2:7400"], "consensus": {"penaltyMultiplier": 0.25}}"#,
        )
        .unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        assert_eq!(config.network_id, "pok-test");
        assert_eq!(config.bootstrap_peers, vec!["10.0.0.2:7400".to_string()]);
        assert_eq!(config.consensus.penalty_multiplier, 0.25);
        assert_eq!(config.consensus.max_block_txs, ConsensusConfig::default().max_block_txs);
        assert_eq!(config.listen_addr, LedgerConfig::default().listen_addr);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = LedgerConfig::default();
        config.consensus.penalty_multiplier = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = LedgerConfig::default();
        config.hello_interval_secs = config.idle_timeout_secs;
        assert!(config.validate().is_err());

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(LedgerConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
