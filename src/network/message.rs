//! Peer wire messages
//!
//! Every message is a JSON object tagged by its `type` field, with camelCase
//! payload fields.

use crate::core::{Block, PuzzleOffer, Transaction};
use crate::crypto::{is_hex_digest, public_key_from_hex, verify, KeyPair};
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x50, 0x4F, 0x4B, 0x31]; // "POK1"

/// Largest accepted frame body
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Most blocks returned for one GET_BLOCKS request
pub const MAX_BLOCKS_PER_RESPONSE: u64 = 500;

/// Network message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// Handshake, sent first on every connection
    Hello(Hello),

    /// Another node has a block in flight
    AnnounceCandidateBlock(CandidateAnnouncement),

    /// Gossip a new transaction
    TxBroadcast(TxBroadcast),

    /// A proposed block with the puzzle answer that earned it
    BlockProposal(BlockProposal),

    /// Request blocks in an inclusive height range
    GetBlocks(GetBlocks),

    /// Response with requested blocks
    Blocks(BlocksResponse),
}

/// Handshake message for initial connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub protocol_version: u32,
    pub network_id: String,
    pub genesis_hash: String,
    /// Sender's chain height
    pub height: u64,
    /// Addresses the sender can be reached at or knows about
    #[serde(default)]
    pub known_peers: Vec<String>,
    pub client_version: String,
}

impl Hello {
    pub fn new(network_id: &str, genesis_hash: &str, height: u64, known_peers: Vec<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            network_id: network_id.to_string(),
            genesis_hash: genesis_hash.to_string(),
            height,
            known_peers,
            client_version: format!("pok-ledger/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateAnnouncement {
    pub block_hash: String,
    pub height: u64,
    pub proposer_public_key: String,
    pub score: f64,
}

impl CandidateAnnouncement {
    pub fn is_well_formed(&self) -> bool {
        is_hex_digest(&self.block_hash)
            && public_key_from_hex(&self.proposer_public_key).is_ok()
            && self.score.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxBroadcast {
    pub transaction: Transaction,
    pub sender_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProposal {
    pub block: Block,
    pub proposer_public_key: String,
    /// Proposer's signature over the block hash
    pub signature: String,
    pub puzzle_hash: String,
    pub puzzle_solution: u64,
    pub proof_of_access_hash: String,
}

impl BlockProposal {
    /// Wrap a sealed block, signing its hash with `keys`
    pub fn new(block: Block, offer: &PuzzleOffer, keys: &KeyPair) -> Self {
        let block_hash = block.hash().unwrap_or_default().to_string();
        Self {
            proposer_public_key: keys.public_key_hex(),
            signature: keys.sign(block_hash.as_str()),
            puzzle_hash: offer.puzzle_hash(),
            puzzle_solution: block.header.nonce,
            proof_of_access_hash: offer.proof_of_access_hash.clone(),
            block,
        }
    }

    /// Signature checks out and the envelope agrees with the header
    pub fn is_authentic(&self) -> bool {
        let Some(block_hash) = self.block.hash() else {
            return false;
        };
        self.puzzle_solution == self.block.header.nonce
            && self.block.header.proof_of_access_hash.as_deref()
                == Some(self.proof_of_access_hash.as_str())
            && verify(&self.signature, block_hash, &self.proposer_public_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocks {
    pub from_height: u64,
    pub to_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<Block>,
}

impl PeerMessage {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::Hello(_) => "HELLO",
            PeerMessage::AnnounceCandidateBlock(_) => "ANNOUNCE_CANDIDATE_BLOCK",
            PeerMessage::TxBroadcast(_) => "TX_BROADCAST",
            PeerMessage::BlockProposal(_) => "BLOCK_PROPOSAL",
            PeerMessage::GetBlocks(_) => "GET_BLOCKS",
            PeerMessage::Blocks(_) => "BLOCKS",
        }
    }
}
