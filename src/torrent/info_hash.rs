//! Computes the info-hash: SHA-1 over the re-encoded `info` subtree.
use crate::bencode::{encoder, BencodeValue};
use sha1::{Digest, Sha1};

/// Re-encodes a parsed `info` dict value and hashes the resulting bytes.
///
/// `info` must be the `BencodeValue::Dict` exactly as parsed from the
/// metainfo file — re-encoding preserves the parsed key order, which is
/// what makes this reproduce the same bytes the tracker and other peers
/// computed their hash over.
pub fn calculate_info_hash(info: &BencodeValue) -> [u8; 20] {
    let encoded = encoder::encode(info);
    let mut hasher = Sha1::new();
    hasher.update(&encoded);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode_all;

    #[test]
    fn info_hash_is_stable_over_reencoding() {
        let bytes: &[u8] = b"d6:lengthi10e4:name4:test12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        let value = decode_all(bytes).unwrap();
        let hash = calculate_info_hash(&value);
        assert_eq!(hash, calculate_info_hash(&value));

        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let expected: [u8; 20] = hasher.finalize().into();
        assert_eq!(hash, expected);
    }
}
