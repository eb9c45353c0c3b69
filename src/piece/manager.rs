//! The scheduling core: tracks piece/block state, peer availability and
//! prevalence, and decides what block to request next.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

use crate::torrent::TorrentFile;

use super::{PieceError, PieceResult};

/// The fixed request size used for every block except possibly the last
/// block of the last piece.
pub const REQUEST_SIZE: u32 = 16_384;

/// How long a pending request may go unanswered before it is eligible
/// for re-issue to a different (or the same) peer.
const EXPIRE_AFTER: Duration = Duration::from_secs(300);

pub type PeerId = [u8; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Missing,
    Pending,
    Received,
}

/// One requestable unit of a piece: a fixed offset/length pair with its
/// current status and, once received, its payload.
#[derive(Debug, Clone)]
pub struct Block {
    pub piece_index: usize,
    pub offset: u32,
    pub length: u32,
    pub status: BlockStatus,
    pub data: Option<Vec<u8>>,
}

struct PieceRecord {
    index: usize,
    hash: [u8; 20],
    blocks: Vec<Block>,
}

impl PieceRecord {
    fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Received)
    }

    fn first_missing_block_mut(&mut self) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.status == BlockStatus::Missing)
    }

    fn block_mut(&mut self, offset: u32) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.offset == offset)
    }

    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Missing;
            block.data = None;
        }
    }

    fn concatenated_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for block in &self.blocks {
            if let Some(data) = &block.data {
                payload.extend_from_slice(data);
            }
        }
        payload
    }
}

struct PendingRequest {
    peer_id: PeerId,
    piece_index: usize,
    offset: u32,
    issued_at: Instant,
}

/// A block a peer session should request next.
#[derive(Debug, Clone, Copy)]
pub struct BlockRequest {
    pub piece_index: usize,
    pub offset: u32,
    pub length: u32,
}

struct FileExtent {
    path: PathBuf,
    start: u64,
    length: u64,
}

pub struct PieceManager {
    pieces: Vec<PieceRecord>,
    missing: BTreeSet<usize>,
    pending: BTreeSet<usize>,
    complete: BTreeSet<usize>,
    total_pieces: usize,
    piece_length: i64,

    availability: HashMap<PeerId, HashSet<usize>>,
    prevalence: Vec<usize>,
    pending_requests: Vec<PendingRequest>,

    bytes_downloaded: u64,

    extents: Vec<FileExtent>,
    open_files: HashMap<PathBuf, File>,
}

impl PieceManager {
    /// Builds piece/block state from a parsed torrent and creates (or
    /// truncates) the on-disk output file(s) at their final size.
    #[tracing::instrument(skip(torrent), level = "debug")]
    pub fn new(torrent: &TorrentFile, output_dir: &std::path::Path) -> PieceResult<Self> {
        let total_pieces = torrent.num_pieces();
        let mut pieces = Vec::with_capacity(total_pieces);
        for index in 0..total_pieces {
            let size = torrent.piece_size(index) as u32;
            let mut blocks = Vec::new();
            let mut offset = 0u32;
            while offset < size {
                let length = REQUEST_SIZE.min(size - offset);
                blocks.push(Block {
                    piece_index: index,
                    offset,
                    length,
                    status: BlockStatus::Missing,
                    data: None,
                });
                offset += length;
            }
            pieces.push(PieceRecord {
                index,
                hash: torrent.pieces_hash[index],
                blocks,
            });
        }

        let extents = torrent
            .file_extents()
            .into_iter()
            .map(|e| FileExtent {
                path: output_dir.join(&e.path),
                start: e.start,
                length: e.length,
            })
            .collect::<Vec<_>>();

        let mut open_files = HashMap::new();
        for extent in &extents {
            if let Some(parent) = extent.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&extent.path)?;
            file.set_len(extent.length)?;
            open_files.insert(extent.path.clone(), file);
        }

        Ok(Self {
            pieces,
            missing: (0..total_pieces).collect(),
            pending: BTreeSet::new(),
            complete: BTreeSet::new(),
            total_pieces,
            piece_length: torrent.info.piece_length,
            availability: HashMap::new(),
            prevalence: vec![0; total_pieces],
            pending_requests: Vec::new(),
            bytes_downloaded: 0,
            extents,
            open_files,
        })
    }

    /// Registers a peer's full bitfield, incrementing prevalence for
    /// every piece it advertises.
    pub fn add_peer(&mut self, peer_id: PeerId, advertised: HashSet<usize>) {
        for &index in &advertised {
            if index < self.total_pieces {
                self.prevalence[index] += 1;
            }
        }
        self.availability.insert(peer_id, advertised);
    }

    /// Records a single `Have` announcement from a peer.
    pub fn update_peer(&mut self, peer_id: PeerId, piece_index: usize) {
        let entry = self.availability.entry(peer_id).or_default();
        if entry.insert(piece_index) && piece_index < self.total_pieces {
            self.prevalence[piece_index] += 1;
        }
    }

    /// Drops a peer's availability entry, decrementing prevalence for
    /// everything it had advertised.
    pub fn remove_peer(&mut self, peer_id: &PeerId) {
        if let Some(advertised) = self.availability.remove(peer_id) {
            for index in advertised {
                if index < self.total_pieces {
                    self.prevalence[index] = self.prevalence[index].saturating_sub(1);
                }
            }
        }
        self.pending_requests.retain(|r| &r.peer_id != peer_id);
    }

    /// True if `peer_id` is still the peer of record for a pending
    /// request on this exact block. A session uses this to notice when
    /// its outstanding request was reassigned to someone else by the
    /// expiry-reclaim path in [`Self::next_request`], so it can clear
    /// its local latch and ask for a new block instead of waiting
    /// forever on a slot it no longer owns.
    pub fn owns_pending(&self, peer_id: &PeerId, piece_index: usize, offset: u32) -> bool {
        self.pending_requests
            .iter()
            .any(|r| &r.peer_id == peer_id && r.piece_index == piece_index && r.offset == offset)
    }

    /// Picks the next block this peer should request, in the three
    /// strata order: expired re-request, ongoing piece, rarest new
    /// piece.
    pub fn next_request(&mut self, peer_id: PeerId) -> Option<BlockRequest> {
        let advertises = self.availability.get(&peer_id)?.clone();

        if let Some(block) = self.try_expired_request(peer_id, &advertises) {
            return Some(block);
        }
        if let Some(block) = self.try_ongoing_piece(peer_id, &advertises) {
            return Some(block);
        }
        self.try_rarest_new_piece(peer_id, &advertises)
    }

    fn try_expired_request(
        &mut self,
        peer_id: PeerId,
        advertises: &HashSet<usize>,
    ) -> Option<BlockRequest> {
        let now = Instant::now();
        let record = self.pending_requests.iter_mut().find(|r| {
            now.duration_since(r.issued_at) >= EXPIRE_AFTER && advertises.contains(&r.piece_index)
        })?;
        record.issued_at = now;
        record.peer_id = peer_id;
        let piece_index = record.piece_index;
        let offset = record.offset;
        let length = self
            .pieces
            .get(piece_index)
            .and_then(|p| p.blocks.iter().find(|b| b.offset == offset))
            .map(|b| b.length)?;
        Some(BlockRequest {
            piece_index,
            offset,
            length,
        })
    }

    fn try_ongoing_piece(
        &mut self,
        peer_id: PeerId,
        advertises: &HashSet<usize>,
    ) -> Option<BlockRequest> {
        let piece_index = self.pending.iter().find(|i| advertises.contains(i)).copied()?;
        let piece = self.pieces.get_mut(piece_index)?;
        let block = piece.first_missing_block_mut()?;
        block.status = BlockStatus::Pending;
        let request = BlockRequest {
            piece_index,
            offset: block.offset,
            length: block.length,
        };
        self.pending_requests.push(PendingRequest {
            peer_id,
            piece_index,
            offset: request.offset,
            issued_at: Instant::now(),
        });
        Some(request)
    }

    fn try_rarest_new_piece(
        &mut self,
        peer_id: PeerId,
        advertises: &HashSet<usize>,
    ) -> Option<BlockRequest> {
        let piece_index = self
            .missing
            .iter()
            .filter(|i| advertises.contains(i))
            .min_by_key(|&&i| (self.prevalence[i], i))
            .copied()?;

        self.missing.remove(&piece_index);
        self.pending.insert(piece_index);

        let piece = self.pieces.get_mut(piece_index)?;
        let block = piece.first_missing_block_mut()?;
        block.status = BlockStatus::Pending;
        let request = BlockRequest {
            piece_index,
            offset: block.offset,
            length: block.length,
        };
        self.pending_requests.push(PendingRequest {
            peer_id,
            piece_index,
            offset: request.offset,
            issued_at: Instant::now(),
        });
        Some(request)
    }

    /// Records a received block. If the owning piece is now complete,
    /// verifies its hash, writes it to disk on a match, or resets its
    /// blocks back to `Missing` on a mismatch.
    #[tracing::instrument(skip(self, data), fields(piece_index, offset), level = "debug")]
    pub fn block_received(
        &mut self,
        peer_id: PeerId,
        piece_index: usize,
        offset: u32,
        data: Vec<u8>,
    ) -> PieceResult<()> {
        self.pending_requests
            .retain(|r| !(r.peer_id == peer_id && r.piece_index == piece_index && r.offset == offset));

        let piece = match self.pieces.get_mut(piece_index) {
            Some(p) => p,
            None => return Ok(()),
        };

        let received_len = data.len() as u64;
        if let Some(block) = piece.block_mut(offset) {
            block.status = BlockStatus::Received;
            block.data = Some(data);
        } else {
            return Ok(());
        }
        self.bytes_downloaded += received_len;

        if !piece.is_complete() {
            return Ok(());
        }

        let payload = piece.concatenated_payload();
        let mut hasher = Sha1::new();
        hasher.update(&payload);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest == piece.hash {
            self.write_piece(piece_index, &payload)?;
            self.pending.remove(&piece_index);
            self.complete.insert(piece_index);
        } else {
            tracing::warn!(piece_index, "piece hash mismatch, resetting");
            piece.reset();
        }

        Ok(())
    }

    fn write_piece(&mut self, piece_index: usize, payload: &[u8]) -> PieceResult<()> {
        let piece_start = piece_index as u64 * self.piece_length as u64;
        let piece_end = piece_start + payload.len() as u64;

        for extent in &self.extents {
            let extent_end = extent.start + extent.length;
            let overlap_start = piece_start.max(extent.start);
            let overlap_end = piece_end.min(extent_end);
            if overlap_start >= overlap_end {
                continue;
            }

            let file = self
                .open_files
                .get_mut(&extent.path)
                .ok_or_else(|| PieceError::Io(std::io::Error::other("missing output file handle")))?;
            let local_offset = overlap_start - extent.start;
            let payload_offset = (overlap_start - piece_start) as usize;
            let payload_slice = &payload[payload_offset..(overlap_end - piece_start) as usize];

            file.seek(SeekFrom::Start(local_offset))?;
            file.write_all(payload_slice)?;
        }
        Ok(())
    }

    /// True once every piece has been verified and written.
    pub fn complete(&self) -> bool {
        self.complete.len() == self.total_pieces
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    /// Always zero: this is a leeching client and never seeds.
    pub fn bytes_uploaded(&self) -> u64 {
        0
    }

    pub fn total_pieces(&self) -> usize {
        self.total_pieces
    }

    pub fn pieces_complete(&self) -> usize {
        self.complete.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder;

    fn single_file_torrent(dir: &std::path::Path) -> TorrentFile {
        // two 4-byte pieces, piece_length 4, total size 8.
        let bytes: &[u8] = b"d8:announce4:test4:infod6:lengthi8e4:name4:demo12:piece lengthi4e6:pieces40:aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbee";
        let value = decoder::decode_all(bytes).unwrap();
        let _ = dir;
        TorrentFile::parse(&value).unwrap()
    }

    #[test]
    fn fresh_manager_has_all_pieces_missing() {
        let dir = tempdir();
        let torrent = single_file_torrent(dir.path());
        let manager = PieceManager::new(&torrent, dir.path()).unwrap();
        assert_eq!(manager.missing.len(), 2);
        assert!(manager.pending.is_empty());
        assert!(manager.complete.is_empty());
    }

    #[test]
    fn next_request_respects_advertised_pieces_only() {
        let dir = tempdir();
        let torrent = single_file_torrent(dir.path());
        let mut manager = PieceManager::new(&torrent, dir.path()).unwrap();

        let peer = [1u8; 20];
        let mut advertised = HashSet::new();
        advertised.insert(1usize);
        manager.add_peer(peer, advertised);

        let request = manager.next_request(peer).unwrap();
        assert_eq!(request.piece_index, 1);

        // no other block to give until the first is answered or expires.
        let second = manager.next_request(peer);
        assert!(second.is_none() || second.unwrap().offset != request.offset);
    }

    #[test]
    fn expired_request_reassignment_revokes_original_peers_ownership() {
        let dir = tempdir();
        let torrent = single_file_torrent(dir.path());
        let mut manager = PieceManager::new(&torrent, dir.path()).unwrap();

        let slow_peer = [4u8; 20];
        let rescuer = [5u8; 20];
        let mut advertised = HashSet::new();
        advertised.insert(0usize);
        manager.add_peer(slow_peer, advertised.clone());
        manager.add_peer(rescuer, advertised);

        let request = manager.next_request(slow_peer).unwrap();
        assert!(manager.owns_pending(&slow_peer, request.piece_index, request.offset));

        // force the pending-request record to look expired.
        manager.pending_requests[0].issued_at =
            Instant::now() - EXPIRE_AFTER - Duration::from_secs(1);

        let reassigned = manager.next_request(rescuer).unwrap();
        assert_eq!(reassigned.piece_index, request.piece_index);
        assert_eq!(reassigned.offset, request.offset);

        // the original peer no longer owns the slot: its session must notice
        // and clear its local pending latch rather than waiting forever.
        assert!(!manager.owns_pending(&slow_peer, request.piece_index, request.offset));
        assert!(manager.owns_pending(&rescuer, request.piece_index, request.offset));
    }

    #[test]
    fn block_received_completes_and_writes_matching_piece() {
        let dir = tempdir();
        let torrent = single_file_torrent(dir.path());
        let mut manager = PieceManager::new(&torrent, dir.path()).unwrap();

        let peer = [2u8; 20];
        let mut advertised = HashSet::new();
        advertised.insert(0usize);
        manager.add_peer(peer, advertised);

        let request = manager.next_request(peer).unwrap();
        assert_eq!(request.piece_index, 0);
        manager
            .block_received(peer, 0, request.offset, b"aaaa".to_vec())
            .unwrap();

        assert!(manager.complete.contains(&0));
        assert!(!manager.complete());
        assert_eq!(manager.bytes_downloaded(), 4);
    }

    #[test]
    fn block_received_resets_piece_on_hash_mismatch() {
        let dir = tempdir();
        let torrent = single_file_torrent(dir.path());
        let mut manager = PieceManager::new(&torrent, dir.path()).unwrap();

        let peer = [3u8; 20];
        let mut advertised = HashSet::new();
        advertised.insert(0usize);
        manager.add_peer(peer, advertised);

        let request = manager.next_request(peer).unwrap();
        manager
            .block_received(peer, 0, request.offset, b"zzzz".to_vec())
            .unwrap();

        assert!(!manager.complete.contains(&0));
        assert!(manager.pending.contains(&0));
        let piece = &manager.pieces[0];
        assert!(piece.blocks.iter().all(|b| b.status == BlockStatus::Missing));
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "rstc-piece-test-{}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_nanos()
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
