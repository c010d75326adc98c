//! PoK Ledger node
//!
//! Runs a ledger node or inspects its data directory.

use clap::{Parser, Subcommand};
use pok_ledger::cli::{self, AppState};
use pok_ledger::config::LedgerConfig;
use pok_ledger::service::{LedgerEvent, LedgerHandle, LedgerService};
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "pok-node")]
#[command(version)]
#[command(about = "A Proof of Knowledge ledger node", long_about = None)]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for ledger storage
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Network id; peers on other networks are ignored
    #[arg(long)]
    network_id: Option<String>,

    /// Puzzle bank JSON file
    #[arg(long)]
    puzzle_bank: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the node key, or show the existing one
    Keygen,

    /// Start the node
    Start {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        listen: Option<String>,

        /// Address advertised to peers
        #[arg(long)]
        advertise: Option<String>,

        /// Initial peers to connect to (comma-separated)
        #[arg(long)]
        peers: Option<String>,

        /// Announce window in milliseconds
        #[arg(long)]
        announce_window_ms: Option<u64>,
    },

    /// Display ledger information
    Chain {
        #[command(subcommand)]
        action: Option<ChainCommands>,
    },

    /// Validate the stored chain
    Validate,

    /// Show mempool status
    Mempool,

    /// Show the penalty box
    Penalties,

    /// Show the learner leaderboard
    Leaderboard {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Show detailed info
    Info,

    /// List recent blocks
    Blocks {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: u64,
    },
}

fn load_config(cli: &Cli) -> Result<LedgerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(network_id) = &cli.network_id {
        config.network_id = network_id.clone();
    }
    if let Some(puzzle_bank) = &cli.puzzle_bank {
        config.puzzle_bank = puzzle_bank.clone();
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Keygen => cli::cmd_keygen(&config.key_path()),

        Commands::Start {
            listen,
            advertise,
            peers,
            announce_window_ms,
        } => run_node(apply_start_flags(
            config,
            listen,
            advertise,
            peers,
            announce_window_ms,
        )),

        Commands::Chain { action } => {
            let state = AppState::new(config)?;
            match action {
                None | Some(ChainCommands::Info) => cli::cmd_chain_info(&state),
                Some(ChainCommands::Blocks { count }) => cli::cmd_chain_blocks(&state, count),
            }
        }

        Commands::Validate => cli::cmd_validate(&AppState::new(config)?),

        Commands::Mempool => cli::cmd_mempool(&AppState::new(config)?),

        Commands::Penalties => cli::cmd_penalties(&mut AppState::new(config)?),

        Commands::Leaderboard { count } => {
            cli::cmd_leaderboard(&mut AppState::new(config)?, count)
        }
    }
}

fn apply_start_flags(
    mut config: LedgerConfig,
    listen: Option<String>,
    advertise: Option<String>,
    peers: Option<String>,
    announce_window_ms: Option<u64>,
) -> LedgerConfig {
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    if advertise.is_some() {
        config.advertised_addr = advertise;
    }
    if let Some(peers) = peers {
        config.bootstrap_peers = peers
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Some(window) = announce_window_ms {
        config.announce_window_ms = window;
    }
    config
}

fn run_node(config: LedgerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let mut service = LedgerService::open(config)?;
        let addr = service.bind().await?;
        let handle = service.handle();

        println!("🌐 PoK node {} listening on {}", service.public_key(), addr);
        println!("   Commands: progress <lessonId> | answer <n> | connect <host:port> | status | quit");

        tokio::spawn(print_events(handle.clone()));
        tokio::spawn(console(handle.clone()));

        let shutdown = handle.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down node...");
            shutdown.shutdown().await;
        });

        service.run().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

async fn print_events(handle: LedgerHandle) {
    let mut events = handle.subscribe();
    while let Ok(event) = events.recv().await {
        match event {
            LedgerEvent::BlockCommitted {
                hash,
                height,
                local,
            } => {
                let origin = if local { "ours" } else { "peer" };
                println!("🧱 Block #{} committed ({}): {}", height, origin, hash);
            }
            LedgerEvent::BlockRejected {
                hash,
                proposer,
                reason,
            } => {
                println!("❌ Block {} from {} rejected: {}", hash, proposer, reason);
            }
            LedgerEvent::ProposalAbandoned { competing_hash } => {
                println!("🏳️  Proposal abandoned for {}", competing_hash);
            }
            LedgerEvent::StateChanged(_) => {}
        }
    }
}

async fn console(handle: LedgerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("progress"), Some(lesson)) => handle
                .submit_lesson_progress(json!({"lessonId": lesson, "completed": true}))
                .await
                .map(|offer| match offer {
                    Some(offer) => {
                        println!("❓ {}", offer.question.question_text);
                        for (i, answer) in offer.question.answers.iter().enumerate() {
                            println!("   {}) {}", i, answer);
                        }
                    }
                    None => println!("ℹ️  No puzzle for lesson {}", lesson),
                }),
            (Some("answer"), Some(n)) => match n.parse::<u64>() {
                Ok(answer) => handle
                    .submit_puzzle_solution(answer)
                    .await
                    .map(|hash| println!("📣 Announced block {}", hash)),
                Err(_) => {
                    println!("⚠️  Answer must be a number");
                    Ok(())
                }
            },
            (Some("connect"), Some(addr)) => handle.connect(addr).await,
            (Some("status"), None) => handle.snapshot().await.map(|snapshot| {
                println!("📊 Height {} | {} peers | {:?}", snapshot.height, snapshot.peer_count, snapshot.sync_status);
                println!("   Mempool: {} | proposing: {}", snapshot.mempool_size, snapshot.proposing);
                for entry in snapshot.leaderboard_data.iter().take(5) {
                    println!("   └─ {} score {:.1}", entry.username.as_deref().unwrap_or(&entry.public_key), entry.score);
                }
            }),
            (Some("quit"), None) => {
                handle.shutdown().await;
                return;
            }
            (None, _) => Ok(()),
            _ => {
                println!("⚠️  Unknown command: {}", line.trim());
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("❌ {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flags_override_config() {
        let cli = Cli::try_parse_from([
            "pok-node",
            "start",
            "--listen",
            "127.0.0.1:7401",
            "--peers",
            "127.0.0.1:7400, ,127.0.0.1:7402",
            "--announce-window-ms",
            "250",
        ])
        .unwrap();
        let Commands::Start {
            listen,
            advertise,
            peers,
            announce_window_ms,
        } = cli.command
        else {
            panic!("expected start");
        };

        let config = apply_start_flags(LedgerConfig::default(), listen, advertise, peers, announce_window_ms);
        assert_eq!(config.listen_addr, "127.0.0.1:7401");
        assert_eq!(config.bootstrap_peers, vec!["127.0.0.1:7400", "127.0.0.1:7402"]);
        assert_eq!(config.announce_window_ms, 250);
        assert_eq!(config.advertised_addr, LedgerConfig::default().advertised_addr);
    }

    #[test]
    fn test_keygen_needs_no_store() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("node");
        let cli = Cli::try_parse_from(["pok-node", "--data-dir", data_dir.to_str().unwrap(), "keygen"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert!(matches!(cli.command, Commands::Keygen));

        cli::cmd_keygen(&config.key_path()).unwrap();
        assert!(config.key_path().exists());
    }
}
