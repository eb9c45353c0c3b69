//! Encodes bencode values back into their canonical byte representation.
//!
//! Encoding never fails — any `BencodeValue` that exists is already
//! well-formed. Dict keys are emitted in the order stored on the value,
//! which for a value produced by the decoder is parse order (required
//! for info-hash round-tripping) and for a value built from scratch is
//! whatever order the caller chose (callers building fresh dicts should
//! insert keys in ascending lexicographic order themselves).
use super::BencodeValue;

pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &BencodeValue, out: &mut Vec<u8>) {
    match value {
        BencodeValue::Bytes(s) => encode_string(s, out),
        BencodeValue::Int(i) => encode_integer(*i, out),
        BencodeValue::List(list) => encode_list(list, out),
        BencodeValue::Dict(entries) => encode_dict(entries, out),
    }
}

fn encode_string(s: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s);
}

fn encode_integer(i: i64, out: &mut Vec<u8>) {
    out.push(b'i');
    out.extend_from_slice(i.to_string().as_bytes());
    out.push(b'e');
}

fn encode_list(list: &[BencodeValue], out: &mut Vec<u8>) {
    out.push(b'l');
    for item in list {
        encode_into(item, out);
    }
    out.push(b'e');
}

fn encode_dict(entries: &[(Vec<u8>, BencodeValue)], out: &mut Vec<u8>) {
    out.push(b'd');
    for (key, value) in entries {
        encode_string(key, out);
        encode_into(value, out);
    }
    out.push(b'e');
}

/// Sorts entries into ascending lexicographic byte order, for dicts built
/// from scratch rather than parsed (parsed dicts must keep parse order).
fn sort_dict_keys(entries: &mut [(Vec<u8>, BencodeValue)]) {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
}

#[cfg(test)]
mod tests {
    use super::super::decoder::decode_all;
    use super::*;

    #[test]
    fn round_trips_list() {
        let bytes = b"li1ei2e3:abce";
        let value = decode_all(bytes).unwrap();
        assert_eq!(encode(&value), bytes);
    }

    #[test]
    fn round_trips_dict_in_parsed_key_order() {
        let bytes = b"d3:cow3:moo4:spam4:eggse";
        let value = decode_all(bytes).unwrap();
        assert_eq!(encode(&value), bytes);
    }

    #[test]
    fn sorts_keys_for_freshly_built_dict() {
        let mut entries = vec![
            (b"zebra".to_vec(), BencodeValue::Int(1)),
            (b"apple".to_vec(), BencodeValue::Int(2)),
        ];
        sort_dict_keys(&mut entries);
        let value = BencodeValue::Dict(entries);
        assert_eq!(encode(&value), b"d5:applei2e5:zebrai1ee");
    }
}
