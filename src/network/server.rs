//! TCP transport
//!
//! Frames are `MAGIC (4) | length (u32 BE) | JSON body`. Each connection
//! runs a reader loop and a writer task; everything the reader decodes is
//! forwarded to the node as a [`NetworkEvent`]. A broken frame closes the
//! connection. A well-framed body that fails to parse is logged and skipped.

use crate::network::message::{PeerMessage, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::{PeerError, PeerHandle, PeerId};
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Outgoing messages buffered per peer
const PEER_QUEUE_SIZE: usize = 100;

const HEADER_LEN: usize = 8;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

fn next_peer_id() -> PeerId {
    NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)
}

/// What connection tasks report to the node
#[derive(Debug)]
pub enum NetworkEvent {
    Opened {
        handle: PeerHandle,
        outbound: bool,
    },
    Message {
        peer_id: PeerId,
        message: PeerMessage,
    },
    Closed {
        peer_id: PeerId,
    },
}

fn invalid_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

/// Message codec for length-prefixed framing
///
/// Decoding yields the parse result of each complete frame, so the reader
/// can drop a bad body and keep the stream.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl Encoder<PeerMessage> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.to_bytes().map_err(|e| invalid_data(e.to_string()))?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!("message of {} bytes too large", data.len())));
        }

        dst.reserve(HEADER_LEN + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Result<PeerMessage, serde_json::Error>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(invalid_data("Invalid magic bytes"));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!("frame of {} bytes too large", len)));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let data = src.split_to(len);

        Ok(Some(PeerMessage::from_bytes(&data)))
    }
}

/// TCP server for accepting peer connections
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to `addr` (e.g. `0.0.0.0:7400`; port 0 picks a free port)
    pub async fn bind(addr: &str) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, spawning a task for each
    pub async fn run(
        self,
        events: mpsc::Sender<NetworkEvent>,
        idle_timeout: Duration,
    ) -> Result<(), std::io::Error> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    log::info!("Incoming connection from {}", addr);
                    spawn_connection(stream, addr, false, events.clone(), idle_timeout);
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
            if events.is_closed() {
                return Ok(());
            }
        }
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Run a connection in the background
pub fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    outbound: bool,
    events: mpsc::Sender<NetworkEvent>,
    idle_timeout: Duration,
) -> PeerId {
    let peer_id = next_peer_id();
    tokio::spawn(async move {
        if let Err(e) =
            handle_connection(stream, addr, peer_id, outbound, events, idle_timeout).await
        {
            log::warn!("Connection error with {}: {}", addr, e);
        }
    });
    peer_id
}

/// Handle a peer connection (both inbound and outbound)
///
/// A connection that stays silent for `idle_timeout` is closed.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer_id: PeerId,
    outbound: bool,
    events: mpsc::Sender<NetworkEvent>,
    idle_timeout: Duration,
) -> Result<(), PeerError> {
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<PeerMessage>(PEER_QUEUE_SIZE);
    let handle = PeerHandle { peer_id, addr, tx };

    events
        .send(NetworkEvent::Opened { handle, outbound })
        .await
        .map_err(|_| PeerError::Disconnected)?;

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(msg).await {
                log::debug!("Write to {} failed: {}", addr, e);
                break;
            }
        }
    });

    loop {
        match tokio::time::timeout(idle_timeout, reader.next()).await {
            Ok(Some(Ok(Ok(message)))) => {
                if events
                    .send(NetworkEvent::Message { peer_id, message })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Some(Ok(Err(e)))) => {
                log::warn!("Skipping unreadable message from {}: {}", addr, e);
            }
            Ok(Some(Err(e))) => {
                log::warn!("Error reading from {}: {}", addr, e);
                break;
            }
            Ok(None) => {
                log::info!("Peer {} disconnected", addr);
                break;
            }
            Err(_) => {
                log::info!("Peer {} idle for {:?}, closing", addr, idle_timeout);
                break;
            }
        }
    }

    write_handle.abort();
    let _ = events.send(NetworkEvent::Closed { peer_id }).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::GetBlocks;

    fn frame(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        buf
    }

    fn get_blocks() -> PeerMessage {
        PeerMessage::GetBlocks(GetBlocks {
            from_height: 1,
            to_height: 5,
        })
    }

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(get_blocks(), &mut buf).unwrap();

        // Partial frame yields nothing yet
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let decoded = codec.decode(&mut partial).unwrap().unwrap().unwrap();
        assert_eq!(decoded, get_blocks());
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_rejects_bad_frames() {
        let mut codec = MessageCodec;

        let mut wrong_magic = BytesMut::from(&b"NOPE\x00\x00\x00\x02{}"[..]);
        assert!(codec.decode(&mut wrong_magic).is_err());

        let mut oversized = BytesMut::new();
        oversized.put_slice(&MAGIC);
        oversized.put_u32(MAX_MESSAGE_SIZE as u32 + 1);
        assert!(codec.decode(&mut oversized).is_err());
    }

    #[test]
    fn test_codec_passes_unparsable_body() {
        let mut codec = MessageCodec;
        let mut buf = frame(br#"{"type":"PING","nonce":1}"#);
        codec.encode(get_blocks(), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).unwrap().unwrap().is_err());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), get_blocks());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_connection_events() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        tokio::spawn(server.run(events_tx.clone(), Duration::from_secs(5)));

        let (stream, peer_addr) = connect_to_peer(&addr).await.unwrap();
        spawn_connection(stream, peer_addr, true, events_tx, Duration::from_secs(5));

        // Both ends report an open connection
        let mut handles = Vec::new();
        for _ in 0..2 {
            match events_rx.recv().await.unwrap() {
                NetworkEvent::Opened { handle, .. } => handles.push(handle),
                other => panic!("unexpected event {:?}", other),
            }
        }

        handles[0].send(get_blocks()).unwrap();
        match events_rx.recv().await.unwrap() {
            NetworkEvent::Message { peer_id, message } => {
                assert_eq!(peer_id, handles[1].peer_id);
                assert_eq!(message, get_blocks());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_message_keeps_connection() {
        use tokio::io::AsyncWriteExt;

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        tokio::spawn(server.run(events_tx, Duration::from_secs(5)));

        let mut raw = TcpStream::connect(&addr).await.unwrap();
        let mut bytes = frame(br#"{"type":"PING","nonce":1}"#);
        MessageCodec.encode(get_blocks(), &mut bytes).unwrap();
        raw.write_all(&bytes).await.unwrap();

        let peer_id = match events_rx.recv().await.unwrap() {
            NetworkEvent::Opened { handle, .. } => handle.peer_id,
            other => panic!("unexpected event {:?}", other),
        };
        match events_rx.recv().await.unwrap() {
            NetworkEvent::Message { peer_id: from, message } => {
                assert_eq!(from, peer_id);
                assert_eq!(message, get_blocks());
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Still open
        let next = tokio::time::timeout(Duration::from_millis(200), events_rx.recv()).await;
        assert!(next.is_err());
        drop(raw);
    }
}
