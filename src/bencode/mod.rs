//! Bencode codec: the self-describing binary format used by metainfo
//! files and tracker responses.
//!
//! Values are a tagged variant over four cases. Dictionaries preserve
//! the order their keys were parsed in — this is mandatory for the
//! info-hash, which is computed over the re-encoded `info` subtree and
//! must reproduce the exact original byte sequence.
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<BencodeValue>),
    /// Key-value pairs in parsed (or caller-supplied) order.
    Dict(Vec<(Vec<u8>, BencodeValue)>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            BencodeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, BencodeValue)]> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in a dict value by its raw byte-string name.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v)
    }
}

/// Custom error type for bencode operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unknown token: {0:#04x}")]
    UnknownToken(u8),

    #[error("declared string length {declared} exceeds remaining input ({remaining} bytes)")]
    StringLengthOverrun { declared: usize, remaining: usize },

    #[error("invalid integer literal")]
    InvalidInteger,

    #[error("dictionary keys must be byte strings")]
    DictKeyNotString,

    #[error("trailing bytes after top-level value")]
    TrailingBytes,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
