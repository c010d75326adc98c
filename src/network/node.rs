//! Peer protocol state machine
//!
//! [`PeerNode`] holds one [`ConnectionInfo`] per open connection plus the
//! local "currently proposing" flag. It does no I/O of its own: the owner
//! feeds it connection events and acts on the returned [`Dispatch`].

use crate::core::Block;
use crate::network::message::{
    BlockProposal, CandidateAnnouncement, GetBlocks, Hello, PeerMessage, TxBroadcast,
    PROTOCOL_VERSION,
};
use crate::network::peer::{ConnectionInfo, PeerError, PeerHandle, PeerId, MAX_PEERS};
use std::collections::HashMap;

/// Most peer addresses remembered from handshakes
pub const MAX_KNOWN_PEERS: usize = 256;

/// Identity a remote must share to participate
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    pub protocol_version: u32,
    pub network_id: String,
    pub genesis_hash: String,
    /// Our own reachable address, advertised first in `knownPeers`
    pub advertised_addr: Option<String>,
}

impl NodeIdentity {
    pub fn new(network_id: &str, genesis_hash: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            network_id: network_id.to_string(),
            genesis_hash: genesis_hash.to_string(),
            advertised_addr: None,
        }
    }
}

/// What the owner should do with a received message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Nothing to do (unknown connection, demoted peer, malformed payload)
    Ignored,
    /// The remote's handshake matched ours
    Handshake { peer_id: PeerId, height: u64 },
    /// The remote's handshake did not match; the connection is demoted
    Demoted { peer_id: PeerId },
    /// An announcement arrived while proposing; our proposal is abandoned
    ProposalAbandoned(CandidateAnnouncement),
    /// An announcement arrived while idle
    Announcement(CandidateAnnouncement),
    Transaction { peer_id: PeerId, broadcast: TxBroadcast },
    Proposal { peer_id: PeerId, proposal: BlockProposal },
    BlocksRequested { peer_id: PeerId, range: GetBlocks },
    Blocks { peer_id: PeerId, blocks: Vec<Block> },
}

/// Connections and proposal arbitration for one node
#[derive(Debug)]
pub struct PeerNode {
    identity: NodeIdentity,
    connections: HashMap<PeerId, ConnectionInfo>,
    handles: HashMap<PeerId, PeerHandle>,
    known_peers: Vec<String>,
    proposing: bool,
    max_peers: usize,
}

impl PeerNode {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            connections: HashMap::new(),
            handles: HashMap::new(),
            known_peers: Vec::new(),
            proposing: false,
            max_peers: MAX_PEERS,
        }
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn set_advertised_addr(&mut self, addr: String) {
        self.identity.advertised_addr = Some(addr);
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register a newly opened connection as compatible
    pub fn on_connection_open(&mut self, handle: PeerHandle, outbound: bool) -> Result<(), PeerError> {
        if self.connections.len() >= self.max_peers {
            return Err(PeerError::MaxPeersReached);
        }

        let info = ConnectionInfo::new(handle.peer_id, handle.addr, outbound);
        log::info!("Added peer {} at {} (outbound: {})", handle.peer_id, handle.addr, outbound);
        self.connections.insert(handle.peer_id, info);
        self.handles.insert(handle.peer_id, handle);
        Ok(())
    }

    pub fn on_connection_close(&mut self, peer_id: PeerId) -> Option<ConnectionInfo> {
        self.handles.remove(&peer_id);
        let info = self.connections.remove(&peer_id);
        if let Some(info) = &info {
            log::info!("Removed peer {} at {}", peer_id, info.addr);
        }
        info
    }

    pub fn connection(&self, peer_id: PeerId) -> Option<&ConnectionInfo> {
        self.connections.get(&peer_id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that completed a compatible handshake
    pub fn peer_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_participating()).count()
    }

    /// Highest chain height reported by a participating peer
    pub fn best_peer_height(&self) -> Option<(PeerId, u64)> {
        self.connections
            .values()
            .filter(|c| c.is_participating())
            .filter_map(|c| c.remote_height().map(|h| (c.peer_id, h)))
            .max_by_key(|&(_, h)| h)
    }

    pub fn known_peers(&self) -> &[String] {
        &self.known_peers
    }

    fn remember_peers(&mut self, addrs: &[String]) {
        for addr in addrs {
            if self.known_peers.len() >= MAX_KNOWN_PEERS {
                break;
            }
            if Some(addr) != self.identity.advertised_addr.as_ref()
                && !self.known_peers.contains(addr)
            {
                self.known_peers.push(addr.clone());
            }
        }
    }

    // =========================================================================
    // Proposal arbitration
    // =========================================================================

    pub fn is_proposing(&self) -> bool {
        self.proposing
    }

    pub fn begin_proposal(&mut self) {
        self.proposing = true;
    }

    pub fn abandon_proposal(&mut self) {
        self.proposing = false;
    }

    /// Clear the flag, returning whether the proposal was still live
    pub fn finish_proposal(&mut self) -> bool {
        std::mem::take(&mut self.proposing)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Our handshake at the given chain height
    pub fn hello(&self, height: u64) -> Hello {
        let mut known = Vec::with_capacity(self.known_peers.len() + 1);
        if let Some(addr) = &self.identity.advertised_addr {
            known.push(addr.clone());
        }
        known.extend(self.known_peers.iter().cloned());

        let mut hello = Hello::new(
            &self.identity.network_id,
            &self.identity.genesis_hash,
            height,
            known,
        );
        hello.protocol_version = self.identity.protocol_version;
        hello
    }

    fn is_hello_compatible(&self, hello: &Hello) -> bool {
        hello.protocol_version == self.identity.protocol_version
            && hello.network_id == self.identity.network_id
            && hello.genesis_hash == self.identity.genesis_hash
    }

    /// Update connection state for `msg` and say what the owner should do
    ///
    /// Application messages are dropped from connections that are demoted
    /// or have not completed a handshake.
    pub fn handle_message(&mut self, peer_id: PeerId, msg: PeerMessage) -> Dispatch {
        log::debug!("Received {} from peer {}", msg.type_name(), peer_id);

        let compatible = {
            let Some(info) = self.connections.get_mut(&peer_id) else {
                return Dispatch::Ignored;
            };
            info.touch();
            info.is_compatible
        };

        if let PeerMessage::Hello(hello) = msg {
            return self.handle_hello(peer_id, hello);
        }

        let participating = self
            .connections
            .get(&peer_id)
            .is_some_and(ConnectionInfo::is_participating);
        if !compatible || !participating {
            log::debug!("Dropping {} from non-participating peer {}", msg.type_name(), peer_id);
            return Dispatch::Ignored;
        }

        match msg {
            PeerMessage::Hello(_) => Dispatch::Ignored,
            PeerMessage::AnnounceCandidateBlock(announcement) => {
                if !announcement.is_well_formed() {
                    log::warn!("Malformed announcement from peer {}", peer_id);
                    return Dispatch::Ignored;
                }
                if self.proposing {
                    log::info!(
                        "Abandoning proposal: peer {} announced block {} at height {}",
                        peer_id,
                        announcement.block_hash,
                        announcement.height
                    );
                    self.proposing = false;
                    Dispatch::ProposalAbandoned(announcement)
                } else {
                    Dispatch::Announcement(announcement)
                }
            }
            PeerMessage::TxBroadcast(broadcast) => Dispatch::Transaction { peer_id, broadcast },
            PeerMessage::BlockProposal(proposal) => Dispatch::Proposal { peer_id, proposal },
            PeerMessage::GetBlocks(range) => Dispatch::BlocksRequested { peer_id, range },
            PeerMessage::Blocks(response) => Dispatch::Blocks {
                peer_id,
                blocks: response.blocks,
            },
        }
    }

    fn handle_hello(&mut self, peer_id: PeerId, hello: Hello) -> Dispatch {
        let compatible = self.is_hello_compatible(&hello);
        let height = hello.height;
        let known = hello.known_peers.clone();

        let Some(info) = self.connections.get_mut(&peer_id) else {
            return Dispatch::Ignored;
        };
        if !compatible {
            log::warn!(
                "Peer {} incompatible: version {} network {} ({})",
                peer_id,
                hello.protocol_version,
                hello.network_id,
                hello.client_version
            );
            info.is_compatible = false;
            info.hello = Some(hello);
            return Dispatch::Demoted { peer_id };
        }
        if !info.is_compatible {
            // Demotion is permanent for the connection
            return Dispatch::Ignored;
        }

        log::info!(
            "Peer {} connected: height={}, agent={}",
            peer_id,
            height,
            hello.client_version
        );
        info.hello = Some(hello);
        self.remember_peers(&known);
        Dispatch::Handshake { peer_id, height }
    }

    /// Send to one peer
    pub fn send_to(&self, peer_id: PeerId, msg: PeerMessage) -> Result<(), PeerError> {
        self.handles
            .get(&peer_id)
            .ok_or(PeerError::UnknownPeer(peer_id))?
            .send(msg)
    }

    /// Best-effort fan-out to every participating connection
    pub fn broadcast(&self, msg: PeerMessage) -> usize {
        self.broadcast_filtered(msg, None)
    }

    /// Fan-out skipping the peer the message came from
    pub fn broadcast_except(&self, msg: PeerMessage, except: PeerId) -> usize {
        self.broadcast_filtered(msg, Some(except))
    }

    fn broadcast_filtered(&self, msg: PeerMessage, except: Option<PeerId>) -> usize {
        let mut sent = 0;
        for (peer_id, handle) in &self.handles {
            if Some(*peer_id) == except {
                continue;
            }
            let participating = self
                .connections
                .get(peer_id)
                .is_some_and(ConnectionInfo::is_participating);
            if !participating {
                continue;
            }
            match handle.send(msg.clone()) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("Failed to send to peer {}: {}", peer_id, e),
            }
        }
        sent
    }
}
