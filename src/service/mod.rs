//! Ledger service
//!
//! [`LedgerService`] owns the chain store, consensus engine, peer state and
//! node key, and runs as a single actor. Connection tasks, timers and
//! [`LedgerHandle`] clients talk to it over channels; state changes go out
//! to subscribers as [`LedgerEvent`]s.
//!
//! A local proposal is announced first. It commits only if no competing
//! announcement cancels it during the announce window.

pub mod events;
pub mod handle;
pub mod leaderboard;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigError, LedgerConfig};
use crate::consensus::{get_transaction_by_hash, ConsensusEngine, ConsensusError};
use crate::core::{
    Block, Priority, PuzzleBank, PuzzleError, PuzzleOffer, Transaction, TransactionBuilder,
    TransactionType,
};
use crate::crypto::{KeyError, KeyPair};
use crate::network::{
    connect_to_peer, spawn_connection, BlockProposal, BlocksResponse, CandidateAnnouncement,
    Dispatch, GetBlocks, NetworkEvent, NodeIdentity, PeerError, PeerId, PeerMessage, PeerNode,
    Server, TxBroadcast, MAX_BLOCKS_PER_RESPONSE,
};
use crate::storage::{ChainStore, StoreError};
use crate::validation::{is_transaction_schema_valid, validate_typed_transaction, ValidationError};

pub use events::{EventBroadcaster, LedgerEvent, LedgerSnapshot, SyncStatus};
pub use handle::{Command, LedgerHandle};
pub use leaderboard::{compute_leaderboard, score_for, LeaderboardEntry};

const NETWORK_QUEUE_SIZE: usize = 1000;
const COMMAND_QUEUE_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Puzzle bank error: {0}")]
    Puzzle(#[from] PuzzleError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] ValidationError),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No puzzle is pending")]
    NoPendingPuzzle,
    #[error("A proposal is already in flight")]
    ProposalInProgress,
    #[error("No transactions to propose")]
    NothingToPropose,
    #[error("Stored genesis block {0} differs from the built-in one")]
    GenesisMismatch(String),
    #[error("Service stopped")]
    Stopped,
}

/// A proposal waiting out its announce window
#[derive(Debug)]
struct PendingProposal {
    block: Block,
    offer: PuzzleOffer,
}

/// Receivers drained by [`LedgerService::run`]
#[derive(Debug)]
struct Inbox {
    network: mpsc::Receiver<NetworkEvent>,
    timers: mpsc::Receiver<String>,
    commands: mpsc::Receiver<Command>,
}

/// The ledger node
#[derive(Debug)]
pub struct LedgerService {
    config: LedgerConfig,
    keys: KeyPair,
    store: ChainStore,
    engine: ConsensusEngine,
    peers: PeerNode,
    pending_puzzle: Option<PuzzleOffer>,
    pending_proposal: Option<PendingProposal>,
    /// Rebuilt only when a commit or penalty change can move scores
    leaderboard: Vec<LeaderboardEntry>,
    events: EventBroadcaster,
    network_tx: mpsc::Sender<NetworkEvent>,
    timer_tx: mpsc::Sender<String>,
    command_tx: mpsc::Sender<Command>,
    inbox: Option<Inbox>,
    server: Option<Server>,
}

impl LedgerService {
    /// Assemble a service, writing the genesis block into an empty store
    pub fn new(
        config: LedgerConfig,
        keys: KeyPair,
        mut store: ChainStore,
        bank: Arc<PuzzleBank>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let genesis = Block::genesis();
        let genesis_hash = genesis.hash().unwrap_or_default().to_string();
        match store.get_block_by_height(0) {
            Some(stored) if stored.hash() != Some(genesis_hash.as_str()) => {
                return Err(ServiceError::GenesisMismatch(
                    stored.hash().unwrap_or_default().to_string(),
                ));
            }
            Some(_) => {}
            None => {
                store.add_block(genesis)?;
                log::info!("Created genesis block {}", genesis_hash);
            }
        }

        let mut identity = NodeIdentity::new(&config.network_id, &genesis_hash);
        identity.advertised_addr = config.advertised_addr.clone();

        let (network_tx, network) = mpsc::channel(NETWORK_QUEUE_SIZE);
        let (timer_tx, timers) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_SIZE);

        log::info!(
            "Ledger node {} on network {} at height {}",
            keys.public_key_hex(),
            config.network_id,
            store.height().unwrap_or(0)
        );

        let leaderboard = compute_leaderboard(&mut store);

        Ok(Self {
            engine: ConsensusEngine::new(config.consensus.clone(), bank),
            peers: PeerNode::new(identity),
            config,
            keys,
            store,
            pending_puzzle: None,
            pending_proposal: None,
            leaderboard,
            events: EventBroadcaster::new(),
            network_tx,
            timer_tx,
            command_tx,
            inbox: Some(Inbox {
                network,
                timers,
                commands,
            }),
            server: None,
        })
    }

    /// Load key, store and puzzle bank from the paths in `config`
    pub fn open(config: LedgerConfig) -> Result<Self, ServiceError> {
        let store = ChainStore::open(config.storage_config())?;
        let keys = KeyPair::load_or_generate(&config.key_path())?;
        let bank = PuzzleBank::load(&config.puzzle_bank)?;
        Self::new(config, keys, store, Arc::new(bank))
    }

    pub fn handle(&self) -> LedgerHandle {
        LedgerHandle::new(self.command_tx.clone(), self.events.clone())
    }

    pub fn public_key(&self) -> String {
        self.keys.public_key_hex()
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn peers(&self) -> &PeerNode {
        &self.peers
    }

    pub fn pending_puzzle(&self) -> Option<&PuzzleOffer> {
        self.pending_puzzle.as_ref()
    }

    fn local_height(&self) -> u64 {
        self.store.height().unwrap_or(0)
    }

    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    fn refresh_leaderboard(&mut self) {
        self.leaderboard = compute_leaderboard(&mut self.store);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let height = self.local_height();
        let best_peer_height = self.peers.best_peer_height().map(|(_, h)| h);
        LedgerSnapshot {
            sync_status: SyncStatus::from_heights(height, best_peer_height),
            peer_count: self.peers.peer_count(),
            height,
            mempool_size: self.store.mempool().len(),
            leaderboard_data: self.leaderboard.clone(),
            pending_puzzle: self.pending_puzzle.clone(),
            proposing: self.peers.is_proposing(),
        }
    }

    fn publish_state(&self) {
        let snapshot = self.snapshot();
        self.events.broadcast(LedgerEvent::StateChanged(snapshot));
    }

    // =========================================================================
    // Local submissions
    // =========================================================================

    /// Sign, validate, pool and gossip a transaction
    pub fn submit_transaction(
        &mut self,
        tx_type: TransactionType,
        data: Value,
        priority: Priority,
    ) -> Result<Transaction, ServiceError> {
        let tx = TransactionBuilder::new(tx_type, data)
            .priority(priority)
            .sign(&self.keys);
        validate_typed_transaction(&tx)?;
        self.store.add_to_mempool(tx.clone())?;

        self.peers.broadcast(PeerMessage::TxBroadcast(TxBroadcast {
            transaction: tx.clone(),
            sender_public_key: self.keys.public_key_hex(),
        }));
        log::info!("Submitted {} transaction {}", tx.tx_type, tx.id);
        Ok(tx)
    }

    /// Record progress and select a puzzle for it
    ///
    /// The new offer replaces any pending one. `None` means the bank has no
    /// question for the lesson.
    pub fn submit_lesson_progress(&mut self, data: Value) -> Result<Option<PuzzleOffer>, ServiceError> {
        let tx = self.submit_transaction(TransactionType::LessonProgress, data, Priority::Normal)?;

        let offer = self.engine.select_puzzle_for_transaction(&tx).or_else(|| {
            self.engine
                .select_puzzle_for_user(&self.keys.public_key_hex(), &self.store)
        });
        match &offer {
            Some(offer) => {
                log::info!("Puzzle {} unlocked", offer.question.question_id);
                self.pending_puzzle = Some(offer.clone());
            }
            None => log::info!("No puzzle available for {}", tx.lesson_id().unwrap_or("?")),
        }
        self.publish_state();
        Ok(offer)
    }

    /// Build a block answering the pending puzzle and announce it
    ///
    /// Returns the block hash. A proposal that fails local verification is
    /// handled like any rejected block: the proposer (this node) is
    /// penalised and the puzzle is dropped.
    pub fn submit_puzzle_solution(&mut self, answer: u64) -> Result<String, ServiceError> {
        if self.peers.is_proposing() {
            return Err(ServiceError::ProposalInProgress);
        }
        let offer = self
            .pending_puzzle
            .clone()
            .ok_or(ServiceError::NoPendingPuzzle)?;
        let tip = self
            .store
            .get_latest_block()
            .ok_or(ConsensusError::EmptyChain)?
            .clone();

        let transactions = self.select_block_transactions(&offer.proof_of_access_hash)?;
        if transactions.is_empty() {
            return Err(ServiceError::NothingToPropose);
        }

        let mut block = self.engine.propose_block(
            transactions,
            &tip,
            answer,
            offer.proof_of_access_hash.clone(),
        );
        block.attest(&self.keys);
        let hash = block.hash().unwrap_or_default().to_string();
        let me = self.keys.public_key_hex();

        if let Err(e) = self.engine.check_proposal(&block, &self.store) {
            log::warn!("Own proposal {} rejected: {}", hash, e);
            self.reject_block(&block, &me, &e)?;
            self.pending_puzzle = None;
            self.publish_state();
            return Err(e.into());
        }

        let score = score_for(&self.leaderboard, &me);
        self.peers.begin_proposal();
        self.peers
            .broadcast(PeerMessage::AnnounceCandidateBlock(CandidateAnnouncement {
                block_hash: hash.clone(),
                height: block.height(),
                proposer_public_key: me,
                score,
            }));
        log::info!("Announced candidate block {} at height {}", hash, block.height());

        self.pending_proposal = Some(PendingProposal { block, offer });
        self.publish_state();
        Ok(hash)
    }

    /// Commit the announced proposal `hash` if nothing cancelled it
    pub fn finalize_proposal(&mut self, hash: &str) -> Result<Option<Block>, ServiceError> {
        let current = self
            .pending_proposal
            .as_ref()
            .is_some_and(|p| p.block.hash() == Some(hash));
        if !current {
            return Ok(None);
        }
        let Some(pending) = self.pending_proposal.take() else {
            return Ok(None);
        };
        if !self.peers.finish_proposal() {
            log::info!("Proposal {} was abandoned", hash);
            return Ok(None);
        }

        // A peer block may have landed during the window
        if let Err(e) = self.engine.check_proposal(&pending.block, &self.store) {
            log::info!("Dropping stale proposal {}: {}", hash, e);
            self.publish_state();
            return Ok(None);
        }

        self.commit_block(pending.block.clone(), true)?;
        self.pending_puzzle = None;
        let proposal = BlockProposal::new(pending.block.clone(), &pending.offer, &self.keys);
        self.peers.broadcast(PeerMessage::BlockProposal(proposal));
        self.publish_state();
        Ok(Some(pending.block))
    }

    /// Pending transactions for a new block
    ///
    /// Invalid or already-confirmed entries are purged from the mempool. The
    /// progress transaction behind `proof` is included if it is not yet on
    /// chain.
    fn select_block_transactions(&mut self, proof: &str) -> Result<Vec<Transaction>, StoreError> {
        let limit = self.engine.config.max_block_txs;
        let mut selected = Vec::new();
        let mut stale = Vec::new();

        for tx in self.store.get_transactions_from_mempool(usize::MAX) {
            if !is_transaction_schema_valid(&tx) || self.store.is_transaction_confirmed(&tx.id) {
                stale.push(tx.id);
                continue;
            }
            if selected.len() < limit {
                selected.push(tx);
            }
        }

        let proof_pending = get_transaction_by_hash(proof, &self.store).is_none()
            && !selected.iter().any(|tx| tx.hash() == proof);
        if proof_pending {
            let progress = self
                .store
                .mempool()
                .entries()
                .into_iter()
                .find(|e| e.transaction.hash() == proof && !stale.contains(&e.transaction.id))
                .map(|e| e.transaction.clone());
            if let Some(progress) = progress {
                if selected.len() >= limit {
                    selected.pop();
                }
                selected.push(progress);
            }
        }

        if !stale.is_empty() {
            log::info!("Purging {} stale mempool transactions", stale.len());
            self.store.remove_many_from_mempool(&stale)?;
        }
        Ok(selected)
    }

    fn commit_block(&mut self, block: Block, local: bool) -> Result<(), ServiceError> {
        let ids = block.transaction_ids();
        let hash = block.hash().unwrap_or_default().to_string();
        let height = block.height();

        self.store.add_block(block)?;
        self.store.remove_many_from_mempool(&ids)?;
        self.refresh_leaderboard();

        let superseded = self
            .pending_proposal
            .as_ref()
            .is_some_and(|p| p.block.height() <= height);
        if superseded {
            log::info!("Block {} supersedes our pending proposal", hash);
            self.pending_proposal = None;
            self.peers.abandon_proposal();
        }

        log::info!(
            "Committed block {} at height {} with {} transactions",
            hash,
            height,
            ids.len()
        );
        self.events
            .broadcast(LedgerEvent::BlockCommitted { hash, height, local });
        Ok(())
    }

    fn reject_block(
        &mut self,
        block: &Block,
        proposer: &str,
        reason: &ConsensusError,
    ) -> Result<(), ServiceError> {
        self.engine
            .handle_failed_block(block, proposer, &mut self.store)?;
        self.refresh_leaderboard();
        self.events.broadcast(LedgerEvent::BlockRejected {
            hash: block.hash().unwrap_or_default().to_string(),
            proposer: proposer.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Network
    // =========================================================================

    pub fn handle_network_event(&mut self, event: NetworkEvent) -> Result<(), ServiceError> {
        match event {
            NetworkEvent::Opened { handle, outbound } => {
                let peer_id = handle.peer_id;
                if let Err(e) = self.peers.on_connection_open(handle, outbound) {
                    log::warn!("Refusing peer {}: {}", peer_id, e);
                    return Ok(());
                }
                let hello = self.peers.hello(self.local_height());
                if let Err(e) = self.peers.send_to(peer_id, PeerMessage::Hello(hello)) {
                    log::warn!("Failed to send handshake to peer {}: {}", peer_id, e);
                }
            }
            NetworkEvent::Message { peer_id, message } => {
                self.handle_peer_message(peer_id, message)?;
            }
            NetworkEvent::Closed { peer_id } => {
                if self.peers.on_connection_close(peer_id).is_some() {
                    self.publish_state();
                }
            }
        }
        Ok(())
    }

    fn handle_peer_message(&mut self, peer_id: PeerId, message: PeerMessage) -> Result<(), ServiceError> {
        match self.peers.handle_message(peer_id, message) {
            Dispatch::Ignored | Dispatch::Announcement(_) => {}
            Dispatch::Demoted { .. } => self.publish_state(),
            Dispatch::Handshake { peer_id, height } => {
                self.request_missing_blocks(peer_id, height);
                self.publish_state();
            }
            Dispatch::ProposalAbandoned(announcement) => {
                self.pending_proposal = None;
                self.events.broadcast(LedgerEvent::ProposalAbandoned {
                    competing_hash: announcement.block_hash,
                });
                self.publish_state();
            }
            Dispatch::Transaction { peer_id, broadcast } => {
                self.accept_transaction(peer_id, broadcast.transaction)?;
            }
            Dispatch::Proposal { peer_id, proposal } => {
                self.accept_proposal(peer_id, proposal)?;
            }
            Dispatch::BlocksRequested { peer_id, range } => self.serve_blocks(peer_id, range),
            Dispatch::Blocks { peer_id, blocks } => self.accept_blocks(peer_id, blocks)?,
        }
        Ok(())
    }

    fn accept_transaction(&mut self, peer_id: PeerId, tx: Transaction) -> Result<(), ServiceError> {
        if self.store.mempool_contains(&tx.id) || self.store.is_transaction_confirmed(&tx.id) {
            return Ok(());
        }
        if let Err(e) = validate_typed_transaction(&tx) {
            log::warn!("Dropping transaction {} from peer {}: {}", tx.id, peer_id, e);
            return Ok(());
        }
        self.store.add_to_mempool(tx.clone())?;

        self.peers.broadcast_except(
            PeerMessage::TxBroadcast(TxBroadcast {
                transaction: tx,
                sender_public_key: self.keys.public_key_hex(),
            }),
            peer_id,
        );
        self.publish_state();
        Ok(())
    }

    /// Verify a peer's proposal and commit it, or penalise its proposer
    fn accept_proposal(&mut self, peer_id: PeerId, proposal: BlockProposal) -> Result<(), ServiceError> {
        let Some(hash) = proposal.block.hash().map(str::to_string) else {
            return Ok(());
        };
        if self.store.get_block_by_hash(&hash).is_some() {
            return Ok(());
        }
        if !proposal.is_authentic() {
            log::warn!("Unauthenticated proposal {} from peer {}", hash, peer_id);
            return Ok(());
        }

        let local = self.local_height();
        let height = proposal.block.height();
        if height > local + 1 {
            log::info!("Proposal {} at height {} is ahead of us, catching up", hash, height);
            self.request_missing_blocks(peer_id, height - 1);
            return Ok(());
        }
        if height <= local {
            log::debug!("Ignoring stale proposal {} at height {}", hash, height);
            return Ok(());
        }

        match self.engine.check_proposal(&proposal.block, &self.store) {
            Ok(()) => {
                self.commit_block(proposal.block.clone(), false)?;
                self.peers
                    .broadcast_except(PeerMessage::BlockProposal(proposal), peer_id);
            }
            Err(ConsensusError::Store(e)) => return Err(e.into()),
            Err(e) => {
                log::warn!(
                    "Rejected proposal {} from {}: {}",
                    hash,
                    proposal.proposer_public_key,
                    e
                );
                self.reject_block(&proposal.block, &proposal.proposer_public_key, &e)?;
            }
        }
        self.publish_state();
        Ok(())
    }

    fn request_missing_blocks(&self, peer_id: PeerId, remote_height: u64) {
        let local = self.local_height();
        if remote_height <= local {
            return;
        }
        let range = GetBlocks {
            from_height: local + 1,
            to_height: remote_height.min(local + MAX_BLOCKS_PER_RESPONSE),
        };
        log::info!(
            "Requesting blocks {}..={} from peer {}",
            range.from_height,
            range.to_height,
            peer_id
        );
        if let Err(e) = self.peers.send_to(peer_id, PeerMessage::GetBlocks(range)) {
            log::warn!("Failed to request blocks: {}", e);
        }
    }

    fn serve_blocks(&self, peer_id: PeerId, range: GetBlocks) {
        let to = range
            .to_height
            .min(range.from_height.saturating_add(MAX_BLOCKS_PER_RESPONSE - 1));
        let blocks: Vec<Block> = self
            .store
            .get_blocks_by_height_range(range.from_height, to)
            .into_iter()
            .cloned()
            .collect();
        if let Err(e) = self
            .peers
            .send_to(peer_id, PeerMessage::Blocks(BlocksResponse { blocks }))
        {
            log::warn!("Failed to send blocks: {}", e);
        }
    }

    /// Apply catch-up blocks in height order, stopping at the first failure
    fn accept_blocks(&mut self, peer_id: PeerId, mut blocks: Vec<Block>) -> Result<(), ServiceError> {
        blocks.sort_by_key(Block::height);
        let mut added = 0;
        for block in blocks {
            if block.hash().is_some_and(|h| self.store.get_block_by_hash(h).is_some()) {
                continue;
            }
            if let Err(e) = self.engine.check_proposal(&block, &self.store) {
                log::warn!(
                    "Catch-up block at height {} from peer {} rejected: {}",
                    block.height(),
                    peer_id,
                    e
                );
                break;
            }
            self.commit_block(block, false)?;
            added += 1;
        }

        if added > 0 {
            log::info!("Caught up {} blocks from peer {}", added, peer_id);
            if let Some((best_peer, best_height)) = self.peers.best_peer_height() {
                self.request_missing_blocks(best_peer, best_height);
            }
            self.publish_state();
        }
        Ok(())
    }

    /// Re-send our handshake to every peer and resume any catch-up
    fn refresh_peers(&mut self) {
        let hello = self.peers.hello(self.local_height());
        self.peers.broadcast(PeerMessage::Hello(hello));
        if let Some((best_peer, best_height)) = self.peers.best_peer_height() {
            self.request_missing_blocks(best_peer, best_height);
        }
    }

    // =========================================================================
    // Actor loop
    // =========================================================================

    /// Reap expired penalties, restoring full scores on the board
    fn sweep_penalties(&mut self) {
        match self.store.cleanup_expired_penalties() {
            Ok(0) => {}
            Ok(_) => {
                self.refresh_leaderboard();
                self.publish_state();
            }
            Err(e) => log::error!("Penalty sweep failed: {}", e),
        }
    }

    /// Bind the peer server; returns the bound address
    pub async fn bind(&mut self) -> Result<SocketAddr, ServiceError> {
        let server = Server::bind(&self.config.listen_addr).await?;
        let addr = server.local_addr();
        if self.peers.identity().advertised_addr.is_none() && !addr.ip().is_unspecified() {
            self.peers.set_advertised_addr(addr.to_string());
        }
        self.server = Some(server);
        Ok(addr)
    }

    fn dial(&self, addr: String) {
        let events = self.network_tx.clone();
        let idle_timeout = self.config.idle_timeout();
        tokio::spawn(async move {
            log::info!("Connecting to peer: {}", addr);
            match connect_to_peer(&addr).await {
                Ok((stream, peer_addr)) => {
                    spawn_connection(stream, peer_addr, true, events, idle_timeout);
                }
                Err(e) => log::warn!("Failed to connect to {}: {}", addr, e),
            }
        });
    }

    fn schedule_finalize(&self, hash: String) {
        let timers = self.timer_tx.clone();
        let window = self.config.announce_window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = timers.send(hash).await;
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SubmitLessonProgress { data, reply } => {
                let _ = reply.send(self.submit_lesson_progress(data));
            }
            Command::SubmitTransaction {
                tx_type,
                data,
                priority,
                reply,
            } => {
                let result = self.submit_transaction(tx_type, data, priority);
                if result.is_ok() {
                    self.publish_state();
                }
                let _ = reply.send(result);
            }
            Command::SubmitPuzzleSolution { answer, reply } => {
                let result = self.submit_puzzle_solution(answer);
                if let Ok(hash) = &result {
                    self.schedule_finalize(hash.clone());
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Connect { addr } => self.dial(addr),
            Command::Shutdown => {}
        }
    }

    /// Run until shutdown, binding the peer server first if needed
    pub async fn run(mut self) -> Result<(), ServiceError> {
        let mut inbox = self.inbox.take().ok_or(ServiceError::Stopped)?;
        if self.server.is_none() {
            self.bind().await?;
        }
        if let Some(server) = self.server.take() {
            let events = self.network_tx.clone();
            let idle_timeout = self.config.idle_timeout();
            tokio::spawn(async move {
                if let Err(e) = server.run(events, idle_timeout).await {
                    log::error!("Peer server stopped: {}", e);
                }
            });
        }
        for addr in self.config.bootstrap_peers.clone() {
            self.dial(addr);
        }

        let mut hello_tick = tokio::time::interval(self.config.hello_interval());
        let mut sweep_tick = tokio::time::interval(self.config.penalty_sweep_interval());
        self.publish_state();

        loop {
            tokio::select! {
                Some(event) = inbox.network.recv() => {
                    if let Err(e) = self.handle_network_event(event) {
                        log::error!("Failed to handle network event: {}", e);
                    }
                }
                Some(hash) = inbox.timers.recv() => {
                    if let Err(e) = self.finalize_proposal(&hash) {
                        log::error!("Failed to finalize proposal {}: {}", hash, e);
                    }
                }
                command = inbox.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        log::info!("Ledger service shutting down...");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                _ = hello_tick.tick() => self.refresh_peers(),
                _ = sweep_tick.tick() => self.sweep_penalties(),
            }
        }

        Ok(())
    }
}
