//! Library root for rs-torrent-client.
//!
//! Re-exports core modules: bencode codec, torrent metainfo, tracker
//! client, piece scheduler, peer-wire protocol, and the orchestrator
//! that ties them together, plus the CLI/logging glue used by `main`.
pub mod bencode;
pub mod cli;
pub mod logging;
pub mod orchestrator;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
