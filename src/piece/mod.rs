//! Piece/block scheduling: the authoritative state for what content is
//! missing, in flight, or complete, and the rarest-first selection
//! algorithm that drives peer sessions.
use thiserror::Error;

pub mod manager;

pub use manager::{Block, BlockRequest, BlockStatus, PeerId, PieceManager, REQUEST_SIZE};

#[derive(Debug, Error)]
pub enum PieceError {
    #[error("I/O error writing piece to disk: {0}")]
    Io(#[from] std::io::Error),
}

pub type PieceResult<T> = std::result::Result<T, PieceError>;
