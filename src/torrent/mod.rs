//! Torrent file parsing and error handling logic.
//!
//! This module provides types and error handling for working with
//! `.torrent` files: the metainfo model (piece layout, file layout,
//! info-hash, tracker URL rotation).
use thiserror::Error;

pub mod info_hash;
pub mod metainfo;

pub use metainfo::{FileDict, InfoDict, TorrentFile};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("date parse error")]
    DateParseError,

    #[error("handshake failed: invalid protocol identifier")]
    HandshakeInvalidProtocol,

    #[error("handshake failed: info hash mismatch")]
    HandshakeInfoHashMismatch,
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
