//! Client handle for a running [`LedgerService`](super::LedgerService)

use crate::core::{Priority, PuzzleOffer, Transaction, TransactionType};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::events::{EventBroadcaster, LedgerEvent, LedgerSnapshot};
use super::ServiceError;

/// Requests handled by the service actor
#[derive(Debug)]
pub enum Command {
    SubmitLessonProgress {
        data: Value,
        reply: oneshot::Sender<Result<Option<PuzzleOffer>, ServiceError>>,
    },
    SubmitTransaction {
        tx_type: TransactionType,
        data: Value,
        priority: Priority,
        reply: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    SubmitPuzzleSolution {
        answer: u64,
        reply: oneshot::Sender<Result<String, ServiceError>>,
    },
    Snapshot {
        reply: oneshot::Sender<LedgerSnapshot>,
    },
    Connect {
        addr: String,
    },
    Shutdown,
}

/// Cloneable handle for talking to the service actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    commands: mpsc::Sender<Command>,
    events: EventBroadcaster,
}

impl LedgerHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, events: EventBroadcaster) -> Self {
        Self { commands, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Record lesson progress; returns the puzzle it unlocked, if any
    pub async fn submit_lesson_progress(
        &self,
        data: Value,
    ) -> Result<Option<PuzzleOffer>, ServiceError> {
        self.request(|reply| Command::SubmitLessonProgress { data, reply })
            .await?
    }

    /// Sign, pool and gossip a transaction of any type
    pub async fn submit_transaction(
        &self,
        tx_type: TransactionType,
        data: Value,
        priority: Priority,
    ) -> Result<Transaction, ServiceError> {
        self.request(|reply| Command::SubmitTransaction {
            tx_type,
            data,
            priority,
            reply,
        })
        .await?
    }

    /// Answer the pending puzzle; returns the hash of the announced block
    pub async fn submit_puzzle_solution(&self, answer: u64) -> Result<String, ServiceError> {
        self.request(|reply| Command::SubmitPuzzleSolution { answer, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, ServiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Dial a peer in the background
    pub async fn connect(&self, addr: impl Into<String>) -> Result<(), ServiceError> {
        self.commands
            .send(Command::Connect { addr: addr.into() })
            .await
            .map_err(|_| ServiceError::Stopped)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}
