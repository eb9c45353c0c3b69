//! One peer session: Dequeue -> Connect -> Handshake -> MessageLoop ->
//! Teardown. On any failure the session returns to Dequeue and pulls
//! the next endpoint from the shared queue.
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::instrument;

use crate::piece::{PeerId, PieceManager};

use super::handshake::Handshake;
use super::message::{extract_frames, PeerMessage};
use super::{PeerError, PeerResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 16 * 1024 + 64;
/// Upper bound on how long a session can sit in a blocking read before
/// rechecking the stop flag, so shutdown can't hang on an idle peer.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Request/interest state for one side of a connection. Only
/// `my_state.choked` gates request issuance in this download-only
/// client.
#[derive(Debug, Default, Clone, Copy)]
struct ConnectionState {
    choked: bool,
    interested: bool,
}

/// Owns one peer endpoint slot, repeatedly draining the shared queue of
/// discovered peers.
pub struct Session {
    info_hash: [u8; 20],
    our_peer_id: PeerId,
    piece_manager: Arc<Mutex<PieceManager>>,
    endpoints: Arc<Mutex<mpsc::Receiver<SocketAddr>>>,
    stop: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        info_hash: [u8; 20],
        our_peer_id: PeerId,
        piece_manager: Arc<Mutex<PieceManager>>,
        endpoints: Arc<Mutex<mpsc::Receiver<SocketAddr>>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            info_hash,
            our_peer_id,
            piece_manager,
            endpoints,
            stop,
        }
    }

    /// Runs until the endpoint queue is closed and drained, or the stop
    /// flag is set.
    pub async fn run(self) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let addr = {
                let mut rx = self.endpoints.lock().await;
                match rx.recv().await {
                    Some(addr) => addr,
                    None => return,
                }
            };

            if let Err(err) = self.handle_endpoint(addr).await {
                tracing::warn!(peer = %addr, error = %err, "peer session ended");
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(peer = %addr))]
    async fn handle_endpoint(&self, addr: SocketAddr) -> PeerResult<()> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        let handshake = Handshake::exchange(&mut stream, self.info_hash, self.our_peer_id).await?;
        let peer_id = handshake.peer_id;

        stream
            .write_all(&PeerMessage::Interested.encode())
            .await
            .map_err(PeerError::Io)?;

        let result = self.message_loop(&mut stream, peer_id).await;

        self.piece_manager.lock().await.remove_peer(&peer_id);
        let _ = stream.shutdown().await;
        result
    }

    async fn message_loop(&self, stream: &mut TcpStream, peer_id: PeerId) -> PeerResult<()> {
        let mut my_state = ConnectionState {
            choked: true,
            interested: true,
        };
        let mut peer_state = ConnectionState::default();
        // the one block this session currently has outstanding, if any.
        // Cleared on receipt, and also revoked if the piece manager's
        // expiry-reclaim path hands the same slot to a different peer.
        let mut outstanding: Option<(usize, u32)> = None;
        let mut read_buf = BytesMut::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if self.stop.load(Ordering::SeqCst) {
                let _ = stream.shutdown().await;
                return Ok(());
            }

            let n = match timeout(STOP_CHECK_INTERVAL, stream.read(&mut chunk)).await {
                Ok(result) => result.map_err(PeerError::Io)?,
                Err(_elapsed) => continue,
            };
            if n == 0 {
                return Ok(());
            }
            read_buf.extend_from_slice(&chunk[..n]);

            for message in extract_frames(&mut read_buf)? {
                self.handle_message(
                    message,
                    peer_id,
                    &mut my_state,
                    &mut peer_state,
                    &mut outstanding,
                )
                .await?;
            }

            if let Some((piece_index, offset)) = outstanding {
                if !self
                    .piece_manager
                    .lock()
                    .await
                    .owns_pending(&peer_id, piece_index, offset)
                {
                    outstanding = None;
                }
            }

            if !my_state.choked && my_state.interested && outstanding.is_none() {
                let next = self.piece_manager.lock().await.next_request(peer_id);
                if let Some(request) = next {
                    let frame = PeerMessage::Request {
                        index: request.piece_index as u32,
                        begin: request.offset,
                        length: request.length,
                    }
                    .encode();
                    stream.write_all(&frame).await.map_err(PeerError::Io)?;
                    outstanding = Some((request.piece_index, request.offset));
                }
            }
        }
    }

    async fn handle_message(
        &self,
        message: PeerMessage,
        peer_id: PeerId,
        my_state: &mut ConnectionState,
        peer_state: &mut ConnectionState,
        outstanding: &mut Option<(usize, u32)>,
    ) -> PeerResult<()> {
        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => my_state.choked = true,
            PeerMessage::Unchoke => my_state.choked = false,
            PeerMessage::Interested => peer_state.interested = true,
            PeerMessage::NotInterested => peer_state.interested = false,
            PeerMessage::Have { piece_index } => {
                self.piece_manager
                    .lock()
                    .await
                    .update_peer(peer_id, piece_index as usize);
            }
            PeerMessage::BitField { bits } => {
                self.piece_manager
                    .lock()
                    .await
                    .add_peer(peer_id, bitfield_to_set(&bits));
            }
            PeerMessage::Request { .. } | PeerMessage::Cancel { .. } => {
                // no seeding in this design: requests from peers are ignored.
            }
            PeerMessage::Piece { index, begin, block } => {
                self.piece_manager
                    .lock()
                    .await
                    .block_received(peer_id, index as usize, begin, block)?;
                *outstanding = None;
            }
        }
        Ok(())
    }
}

/// Converts a raw bitfield (MSB of byte 0 = piece 0) into the set of
/// piece indices it advertises.
fn bitfield_to_set(bits: &[u8]) -> HashSet<usize> {
    let mut set = HashSet::new();
    for (byte_index, byte) in bits.iter().enumerate() {
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                set.insert(byte_index * 8 + bit);
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_to_set_reads_msb_first() {
        let bits = [0b1010_0000u8];
        let set = bitfield_to_set(&bits);
        assert!(set.contains(&0));
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert_eq!(set.len(), 2);
    }
}
