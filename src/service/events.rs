//! State events published to subscribers
//!
//! The UI layer subscribes to a broadcast channel and renders what it
//! receives; it never reaches into the service.

use crate::core::PuzzleOffer;
use serde::Serialize;
use tokio::sync::broadcast;

use super::leaderboard::LeaderboardEntry;

/// Maximum number of events to buffer per subscriber
const BROADCAST_CAPACITY: usize = 100;

/// How far the local chain is behind the best known peer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    /// No participating peers
    Offline,
    #[serde(rename_all = "camelCase")]
    Syncing { local_height: u64, target_height: u64 },
    Synced,
}

impl SyncStatus {
    pub fn from_heights(local_height: u64, best_peer_height: Option<u64>) -> Self {
        match best_peer_height {
            None => SyncStatus::Offline,
            Some(target) if target > local_height => SyncStatus::Syncing {
                local_height,
                target_height: target,
            },
            Some(_) => SyncStatus::Synced,
        }
    }
}

/// Everything a UI needs to render the ledger
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub sync_status: SyncStatus,
    pub peer_count: usize,
    pub height: u64,
    pub mempool_size: usize,
    pub leaderboard_data: Vec<LeaderboardEntry>,
    pub pending_puzzle: Option<PuzzleOffer>,
    /// Whether a local proposal is waiting out its announce window
    pub proposing: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum LedgerEvent {
    /// Any state change; carries the full new snapshot
    StateChanged(LedgerSnapshot),
    /// A block was appended to the local chain
    BlockCommitted { hash: String, height: u64, local: bool },
    /// A proposed block failed verification and its proposer was penalised
    BlockRejected { hash: String, proposer: String, reason: String },
    /// A competing announcement cancelled our proposal
    ProposalAbandoned { competing_hash: String },
}

/// Broadcaster for ledger events
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn broadcast(&self, event: LedgerEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
