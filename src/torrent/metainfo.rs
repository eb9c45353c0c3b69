//! The metainfo model: a parsed view of a `.torrent` file.
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bencode::{decoder, BencodeValue};

use super::{info_hash, TorrentError, TorrentResult};

/// One file within a (possibly multi-file) torrent.
#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub private: bool,
    pub name: String,
    pub length: Option<i64>,
    pub files: Vec<FileDict>,
    pub is_directory: bool,
}

/// The byte range of a single on-disk file within the concatenated
/// content stream, used to split a piece write across file boundaries.
#[derive(Debug, PartialEq, Clone)]
pub struct FileExtent {
    pub path: PathBuf,
    pub start: u64,
    pub length: u64,
}

#[derive(Debug)]
pub struct TorrentFile {
    /// Flattened, de-duplicated tracker announce URLs: the primary
    /// `announce` entry first, followed by `announce-list` entries in
    /// their original tier/position order.
    announce_urls: Vec<String>,
    current_announce: AtomicUsize,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

fn get_str(dict: &BencodeValue, key: &[u8]) -> Option<String> {
    String::from_utf8(dict.get(key)?.as_bytes()?.to_vec()).ok()
}

fn get_int(dict: &BencodeValue, key: &[u8]) -> Option<i64> {
    dict.get(key)?.as_int()
}

fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<String>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("announce-list is not a list".into()))?;
    let mut urls = Vec::new();
    for tier in tiers {
        let trackers = tier
            .as_list()
            .ok_or_else(|| TorrentError::InvalidFormat("announce-list tier is not a list".into()))?;
        for tracker in trackers {
            let url = tracker
                .as_bytes()
                .ok_or_else(|| TorrentError::InvalidFormat("tracker URL is not a string".into()))?;
            urls.push(
                String::from_utf8(url.to_vec())
                    .map_err(|e| TorrentError::InvalidFormat(format!("tracker URL not UTF-8: {e}")))?,
            );
        }
    }
    Ok(urls)
}

fn parse_files(value: &BencodeValue) -> TorrentResult<Vec<FileDict>> {
    let list = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("files is not a list".into()))?;
    let mut files = Vec::with_capacity(list.len());
    for entry in list {
        let length = get_int(entry, b"length")
            .ok_or_else(|| TorrentError::MissingField("files[].length".into()))?;
        let path_list = entry
            .get(b"path")
            .and_then(BencodeValue::as_list)
            .ok_or_else(|| TorrentError::MissingField("files[].path".into()))?;
        let mut path = Vec::with_capacity(path_list.len());
        for segment in path_list {
            let s = segment
                .as_bytes()
                .ok_or_else(|| TorrentError::InvalidFormat("path segment not a string".into()))?;
            path.push(
                String::from_utf8(s.to_vec())
                    .map_err(|e| TorrentError::InvalidFormat(format!("path segment not UTF-8: {e}")))?,
            );
        }
        files.push(FileDict { length, path });
    }
    Ok(files)
}

fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    if value.as_dict().is_none() {
        return Err(TorrentError::InvalidFormat("info is not a dictionary".into()));
    }

    let piece_length =
        get_int(value, b"piece length").ok_or_else(|| TorrentError::MissingField("piece length".into()))?;

    let pieces = value
        .get(b"pieces")
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::MissingField("pieces".into()))?
        .to_vec();

    let private = get_int(value, b"private") == Some(1);

    let name = get_str(value, b"name").ok_or_else(|| TorrentError::MissingField("name".into()))?;

    let length = get_int(value, b"length");

    let files = match value.get(b"files") {
        Some(v) => parse_files(v)?,
        None => Vec::new(),
    };

    let is_directory = !files.is_empty();

    Ok(InfoDict {
        piece_length,
        pieces,
        private,
        name,
        length,
        files,
        is_directory,
    })
}

fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

impl TorrentFile {
    /// Loads and parses a `.torrent` file from disk.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &std::path::Path) -> TorrentResult<TorrentFile> {
        let bytes = std::fs::read(path)?;
        let value = decoder::decode_all(&bytes)?;
        Self::parse(&value)
    }

    /// Parses an already-decoded metainfo dictionary.
    pub fn parse(root: &BencodeValue) -> TorrentResult<TorrentFile> {
        if root.as_dict().is_none() {
            return Err(TorrentError::InvalidFormat("root is not a dictionary".into()));
        }

        let announce =
            get_str(root, b"announce").ok_or_else(|| TorrentError::MissingField("announce".into()))?;

        let info_value = root
            .get(b"info")
            .ok_or_else(|| TorrentError::MissingField("info".into()))?;
        let info = parse_info_dict(info_value)?;

        let mut announce_urls = vec![announce];
        if let Some(list_value) = root.get(b"announce-list") {
            for url in parse_announce_list(list_value)? {
                if !announce_urls.contains(&url) {
                    announce_urls.push(url);
                }
            }
        }

        let creation_date = root.get(b"creation date").and_then(BencodeValue::as_int).and_then(|ts| {
            let secs: u64 = ts.try_into().ok()?;
            Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
        });

        let comment = get_str(root, b"comment").unwrap_or_default();
        let created_by = get_str(root, b"created by").unwrap_or_default();
        let encoding = get_str(root, b"encoding").unwrap_or_default();

        let info_hash = info_hash::calculate_info_hash(info_value);
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(TorrentFile {
            announce_urls,
            current_announce: AtomicUsize::new(0),
            creation_date,
            comment,
            created_by,
            encoding,
            info,
            info_hash,
            pieces_hash,
        })
    }

    /// Returns the current announce URL, advancing the rotation first if
    /// `next` is true. Used when a tracker fails to respond.
    pub fn get_announce(&self, next: bool) -> &str {
        if next {
            self.current_announce
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |idx| {
                    Some((idx + 1) % self.announce_urls.len())
                })
                .ok();
        }
        let idx = self.current_announce.load(Ordering::SeqCst);
        &self.announce_urls[idx]
    }

    pub fn total_length(&self) -> i64 {
        if self.info.is_directory {
            self.info.files.iter().map(|f| f.length).sum()
        } else {
            self.info.length.unwrap_or(0)
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Length of the piece at `index`; the final piece is shorter than
    /// `piece_length` unless the content divides it evenly.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let full = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            let remainder = self.total_length() - full;
            if remainder == 0 {
                self.info.piece_length
            } else {
                remainder
            }
        }
    }

    /// The byte extents of every on-disk file, in declared order, for
    /// splitting a piece write across file boundaries.
    pub fn file_extents(&self) -> Vec<FileExtent> {
        if !self.info.is_directory {
            return vec![FileExtent {
                path: PathBuf::from(&self.info.name),
                start: 0,
                length: self.total_length().max(0) as u64,
            }];
        }

        let mut extents = Vec::with_capacity(self.info.files.len());
        let mut offset: u64 = 0;
        for file in &self.info.files {
            let mut path = PathBuf::from(&self.info.name);
            for segment in &file.path {
                path = path.join(segment);
            }
            let length = file.length.max(0) as u64;
            extents.push(FileExtent {
                path,
                start: offset,
                length,
            });
            offset += length;
        }
        extents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        // piece length 16384, total size 32770 (two full pieces + 2 bytes), 3 piece hashes.
        let mut pieces = vec![b'a'; 20 * 3];
        pieces[0] = b'x';
        let info = format!(
            "d6:lengthi32770e4:name4:demo12:piece lengthi16384e6:pieces{}:",
            pieces.len()
        );
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce20:http://tracker.local4:info");
        out.extend_from_slice(info.as_bytes());
        out.extend_from_slice(&pieces);
        out.extend_from_slice(b"ee");
        out
    }

    #[test]
    fn computes_piece_count_and_last_piece_length() {
        let bytes = sample_bytes();
        let value = decoder::decode_all(&bytes).unwrap();
        let torrent = TorrentFile::parse(&value).unwrap();

        assert_eq!(torrent.num_pieces(), 3);
        assert_eq!(torrent.piece_size(0), 16384);
        assert_eq!(torrent.piece_size(1), 16384);
        assert_eq!(torrent.piece_size(2), 2);
    }

    #[test]
    fn announce_rotation_wraps_around() {
        let bytes = sample_bytes();
        let value = decoder::decode_all(&bytes).unwrap();
        let torrent = TorrentFile::parse(&value).unwrap();

        assert_eq!(torrent.get_announce(false), "http://tracker.local");
        // only one announce URL: rotating still lands back on it.
        assert_eq!(torrent.get_announce(true), "http://tracker.local");
    }

    #[test]
    fn multi_file_extents_are_contiguous() {
        let bytes: &[u8] = b"d8:announce4:test4:infod4:name3:dir5:filesld6:lengthi10e4:pathl1:aeed6:lengthi5e4:pathl1:beee12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        let value = decoder::decode_all(bytes).unwrap();
        let torrent = TorrentFile::parse(&value).unwrap();

        let extents = torrent.file_extents();
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].start, 0);
        assert_eq!(extents[0].length, 10);
        assert_eq!(extents[1].start, 10);
        assert_eq!(extents[1].length, 5);
        assert_eq!(torrent.total_length(), 15);
    }
}
