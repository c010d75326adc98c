//! P2P Networking module
//!
//! Gossip between ledger nodes over framed TCP.
//!
//! # Features
//! - Handshake with protocol, network and genesis compatibility checks
//! - Transaction and block proposal gossip
//! - Candidate announcements for proposal arbitration
//! - Height-range block catch-up

pub mod message;
pub mod node;
pub mod peer;
pub mod server;

pub use message::{
    BlockProposal, BlocksResponse, CandidateAnnouncement, GetBlocks, Hello, PeerMessage,
    TxBroadcast, MAGIC, MAX_BLOCKS_PER_RESPONSE, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use node::{Dispatch, NodeIdentity, PeerNode, MAX_KNOWN_PEERS};
pub use peer::{ConnectionInfo, PeerError, PeerHandle, PeerId, MAX_PEERS};
pub use server::{
    connect_to_peer, handle_connection, spawn_connection, MessageCodec, NetworkEvent, Server,
};
