//! The peer-wire protocol: handshake, message framing, and the
//! per-connection session state machine.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::{MessageError, PeerMessage};
pub use session::Session;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("connection timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] crate::torrent::TorrentError),

    #[error("framing error: {0}")]
    Message(#[from] MessageError),

    #[error("piece manager error: {0}")]
    Piece(#[from] crate::piece::PieceError),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
