//! Per-connection bookkeeping
//!
//! A [`ConnectionInfo`] lives exactly as long as its connection. The
//! [`PeerHandle`] is the sending half of the connection's writer task.

use crate::core::now_millis;
use crate::network::message::{Hello, PeerMessage};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Maximum number of open connections
pub const MAX_PEERS: usize = 16;

/// Local identifier of one connection
pub type PeerId = u64;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Peer send queue full")]
    QueueFull,
    #[error("Max peers reached")]
    MaxPeersReached,
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// Information about one open connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    /// Whether we dialled this connection
    pub outbound: bool,
    /// Cleared when the remote's handshake does not match ours
    pub is_compatible: bool,
    /// Unix milliseconds of the last message received
    pub last_seen: i64,
    /// The remote's most recent handshake
    pub hello: Option<Hello>,
}

impl ConnectionInfo {
    pub fn new(peer_id: PeerId, addr: SocketAddr, outbound: bool) -> Self {
        Self {
            peer_id,
            addr,
            outbound,
            is_compatible: true,
            last_seen: now_millis(),
            hello: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }

    /// Handshake received and compatible
    pub fn is_participating(&self) -> bool {
        self.is_compatible && self.hello.is_some()
    }

    /// Chain height from the remote's last handshake
    pub fn remote_height(&self) -> Option<u64> {
        self.hello.as_ref().map(|h| h.height)
    }
}

/// Handle for sending messages to a peer
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<PeerMessage>,
}

impl PeerHandle {
    /// Queue a message without waiting; a full queue drops the message
    pub fn send(&self, msg: PeerMessage) -> Result<(), PeerError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => PeerError::QueueFull,
            TrySendError::Closed(_) => PeerError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::{GetBlocks, PeerMessage};

    fn get_blocks() -> PeerMessage {
        PeerMessage::GetBlocks(GetBlocks {
            from_height: 0,
            to_height: 1,
        })
    }

    #[test]
    fn test_new_connection_is_compatible() {
        let info = ConnectionInfo::new(1, "127.0.0.1:9000".parse().unwrap(), true);
        assert!(info.is_compatible);
        assert!(!info.is_participating());
        assert_eq!(info.remote_height(), None);
    }

    #[tokio::test]
    async fn test_handle_send_errors() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = PeerHandle {
            peer_id: 1,
            addr: "127.0.0.1:9000".parse().unwrap(),
            tx,
        };

        handle.send(get_blocks()).unwrap();
        assert!(matches!(handle.send(get_blocks()), Err(PeerError::QueueFull)));
        assert_eq!(rx.recv().await, Some(get_blocks()));

        drop(rx);
        assert!(matches!(handle.send(get_blocks()), Err(PeerError::Disconnected)));
    }
}
