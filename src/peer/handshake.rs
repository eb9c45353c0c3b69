//! The BitTorrent peer handshake: the first 68 bytes exchanged over a
//! freshly connected peer socket, verifying both sides are talking
//! about the same torrent.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

use crate::torrent::TorrentError;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A handshake message: protocol identifier, reserved extension bytes,
/// info-hash, and peer-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes into the fixed 68-byte wire representation.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        // buf[20..28] left zeroed: reserved bytes.
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and parses a 68-byte handshake off the stream.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self, TorrentError> {
        let mut buf = [0u8; 68];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(TorrentError::Io)?;

        if buf[0] != 19 || &buf[1..20] != PROTOCOL.as_slice() {
            return Err(TorrentError::HandshakeInvalidProtocol);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Confirms the handshake's info-hash matches ours; otherwise the
    /// peer is talking about a different torrent.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<(), TorrentError> {
        if self.info_hash != expected_info_hash {
            return Err(TorrentError::HandshakeInfoHashMismatch);
        }
        Ok(())
    }

    /// Sends our handshake, then reads and validates the peer's reply.
    /// Returns the peer's handshake (its `peer_id` becomes this peer's
    /// identifier for the piece manager).
    #[instrument(level = "debug", skip(stream))]
    pub async fn exchange(
        stream: &mut TcpStream,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Handshake, TorrentError> {
        let ours = Handshake::new(info_hash, peer_id);
        stream
            .write_all(&ours.serialize())
            .await
            .map_err(TorrentError::Io)?;

        let theirs = Handshake::read(stream).await?;
        theirs.validate(info_hash)?;
        Ok(theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_68_bytes_with_correct_layout() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let buf = hs.serialize();
        assert_eq!(buf.len(), 68);
        assert_eq!(buf[0], 19);
        assert_eq!(&buf[1..20], PROTOCOL.as_slice());
        assert_eq!(&buf[20..28], &[0u8; 8]);
        assert_eq!(&buf[28..48], &[1u8; 20]);
        assert_eq!(&buf[48..68], &[2u8; 20]);
    }

    #[test]
    fn validate_rejects_mismatched_info_hash() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(hs.validate([9u8; 20]).is_err());
        assert!(hs.validate([1u8; 20]).is_ok());
    }
}
