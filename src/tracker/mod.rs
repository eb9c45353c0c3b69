//! Tracker client logic for the BitTorrent protocol.
//!
//! Performs HTTP GET announce requests against the torrent's current
//! announce URL and parses the bencoded response: compact or
//! dictionary-style peer lists, re-announce interval, and the optional
//! `failure reason` that makes the whole response an error.
use std::net::{IpAddr, Ipv4Addr};

use rand::Rng;
use thiserror::Error;

use crate::bencode::{decoder, BencodeValue};
use crate::torrent::TorrentFile;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker did not respond: {0}")]
    NoResponse(#[from] reqwest::Error),

    #[error("tracker reported failure: {0}")]
    Failure(String),

    #[error("malformed tracker response: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("malformed tracker response: {0}")]
    Malformed(String),

    #[error("invalid announce URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A peer endpoint as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub complete: i64,
    pub incomplete: i64,
    pub peers: Vec<Peer>,
}

/// A client communicating with a BitTorrent tracker over HTTP.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
    http: reqwest::Client,
    announced_before: std::sync::atomic::AtomicBool,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
            http: reqwest::Client::new(),
            announced_before: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the torrent's current tracker URL.
    ///
    /// `uploaded`/`downloaded` are this session's running totals; `left`
    /// is derived from the torrent's total size. The first announce of a
    /// process includes `event=started`.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(
        &self,
        torrent: &TorrentFile,
        uploaded: i64,
        downloaded: i64,
    ) -> TrackerResult<AnnounceResponse> {
        let base = torrent.get_announce(false);
        // validate the tracker URL eagerly so a malformed announce-list entry
        // surfaces here rather than as an opaque reqwest error.
        url::Url::parse(base)?;
        let first = !self
            .announced_before
            .swap(true, std::sync::atomic::Ordering::SeqCst);

        let left = torrent.total_length() - downloaded;
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            url_encode(&torrent.info_hash),
            url_encode(&self.peer_id),
            self.port,
            uploaded,
            downloaded,
            left,
        );
        if first {
            query.push_str("&event=started");
        }

        let url = format!("{base}?{query}");
        tracing::debug!(url, "making announce request to tracker");

        let response = self.http.get(&url).send().await?;
        let bytes = response.bytes().await?;
        Self::parse_announce_response(&bytes)
    }

    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let value = decoder::decode_all(bytes)?;

        if let Some(reason) = value.get(b"failure reason").and_then(BencodeValue::as_bytes) {
            return Err(TrackerError::Failure(
                String::from_utf8_lossy(reason).into_owned(),
            ));
        }

        let interval = value.get(b"interval").and_then(BencodeValue::as_int).unwrap_or(0);
        let complete = value.get(b"complete").and_then(BencodeValue::as_int).unwrap_or(0);
        let incomplete = value
            .get(b"incomplete")
            .and_then(BencodeValue::as_int)
            .unwrap_or(0);

        let peers = match value.get(b"peers") {
            Some(BencodeValue::Bytes(compact)) => parse_compact_peers(compact)?,
            Some(BencodeValue::List(dicts)) => parse_dict_peers(dicts)?,
            Some(_) => return Err(TrackerError::Malformed("peers field has wrong type".into())),
            None => Vec::new(),
        };

        Ok(AnnounceResponse {
            interval,
            complete,
            incomplete,
            peers,
        })
    }
}

/// Parses a compact peers blob: 6-byte groups of 4-byte IPv4 + 2-byte
/// big-endian port.
fn parse_compact_peers(blob: &[u8]) -> TrackerResult<Vec<Peer>> {
    if blob.len() % 6 != 0 {
        return Err(TrackerError::Malformed(
            "compact peers blob length is not a multiple of 6".into(),
        ));
    }
    Ok(blob
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Peer {
                ip: IpAddr::V4(ip),
                port,
            }
        })
        .collect())
}

fn parse_dict_peers(dicts: &[BencodeValue]) -> TrackerResult<Vec<Peer>> {
    let mut peers = Vec::with_capacity(dicts.len());
    for dict in dicts {
        let ip_bytes = dict
            .get(b"ip")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| TrackerError::Malformed("peer dict missing ip".into()))?;
        let ip_str = std::str::from_utf8(ip_bytes)
            .map_err(|_| TrackerError::Malformed("peer ip not UTF-8".into()))?;
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| TrackerError::Malformed(format!("invalid peer ip: {ip_str}")))?;
        let port = dict
            .get(b"port")
            .and_then(BencodeValue::as_int)
            .ok_or_else(|| TrackerError::Malformed("peer dict missing port".into()))?;
        peers.push(Peer {
            ip,
            port: port as u16,
        });
    }
    Ok(peers)
}

/// Generates a unique peer ID: a 9-byte client prefix ("-RT0001-")
/// followed by 11 random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    rand::rng().fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// Percent-encodes raw bytes per RFC 3986, leaving unreserved characters
/// (`a-z A-Z 0-9 - . _ ~`) untouched. Used for `info_hash` and `peer_id`,
/// which are raw byte strings rather than UTF-8 text.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_peers_blob_parses_one_peer() {
        let blob = b"\x7f\x00\x00\x01\x1a\xe1";
        let peers = parse_compact_peers(blob).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(peers[0].port, 6881);
    }

    #[test]
    fn parses_failure_reason_as_error() {
        let response: &[u8] = b"d14:failure reason12:torrent gonee";
        let result = Client::parse_announce_response(response);
        assert!(matches!(result, Err(TrackerError::Failure(ref reason)) if reason == "torrent gone"));
    }

    #[test]
    fn parses_compact_peers_from_full_response() {
        let response: &[u8] = b"d8:completei3e10:incompletei1e8:intervali900e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let parsed = Client::parse_announce_response(response).unwrap();
        assert_eq!(parsed.interval, 900);
        assert_eq!(parsed.complete, 3);
        assert_eq!(parsed.incomplete, 1);
        assert_eq!(parsed.peers.len(), 1);
        assert_eq!(parsed.peers[0].port, 6881);
    }

    #[test]
    fn url_encode_escapes_non_unreserved_bytes() {
        assert_eq!(url_encode(b"az09-._~"), "az09-._~");
        assert_eq!(url_encode(&[0xffu8]), "%FF");
    }
}
