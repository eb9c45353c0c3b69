//! Peer-wire message framing: a 4-byte big-endian length prefix
//! followed by an id byte and payload. Length 0 is a KeepAlive with no
//! id byte.
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown message id: {0}")]
    UnknownId(u8),

    #[error("malformed payload for message id {id}: expected at least {expected} bytes, got {actual}")]
    ShortPayload {
        id: u8,
        expected: usize,
        actual: usize,
    },
}

pub type MessageResult<T> = std::result::Result<T, MessageError>;

/// A parsed peer-wire message, or `KeepAlive` for a zero-length frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    BitField { bits: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl PeerMessage {
    /// Encodes into a complete frame: 4-byte length prefix plus body.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => body.push(0),
            PeerMessage::Unchoke => body.push(1),
            PeerMessage::Interested => body.push(2),
            PeerMessage::NotInterested => body.push(3),
            PeerMessage::Have { piece_index } => {
                body.push(4);
                write_u32(&mut body, *piece_index);
            }
            PeerMessage::BitField { bits } => {
                body.push(5);
                body.extend_from_slice(bits);
            }
            PeerMessage::Request { index, begin, length } => {
                body.push(6);
                write_u32(&mut body, *index);
                write_u32(&mut body, *begin);
                write_u32(&mut body, *length);
            }
            PeerMessage::Piece { index, begin, block } => {
                body.push(7);
                write_u32(&mut body, *index);
                write_u32(&mut body, *begin);
                body.extend_from_slice(block);
            }
            PeerMessage::Cancel { index, begin, length } => {
                body.push(8);
                write_u32(&mut body, *index);
                write_u32(&mut body, *begin);
                write_u32(&mut body, *length);
            }
        }

        let mut frame = Vec::with_capacity(4 + body.len());
        write_u32(&mut frame, body.len() as u32);
        frame.extend_from_slice(&body);
        frame
    }

    /// Decodes a single message body (the bytes after the length
    /// prefix; an empty body decodes to `KeepAlive`).
    pub fn decode(body: &[u8]) -> MessageResult<Self> {
        if body.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }
        let id = body[0];
        let payload = &body[1..];
        match id {
            0 => Ok(PeerMessage::Choke),
            1 => Ok(PeerMessage::Unchoke),
            2 => Ok(PeerMessage::Interested),
            3 => Ok(PeerMessage::NotInterested),
            4 => {
                require_len(id, payload, 4)?;
                Ok(PeerMessage::Have {
                    piece_index: read_u32(payload, 0),
                })
            }
            5 => Ok(PeerMessage::BitField {
                bits: payload.to_vec(),
            }),
            6 => {
                require_len(id, payload, 12)?;
                Ok(PeerMessage::Request {
                    index: read_u32(payload, 0),
                    begin: read_u32(payload, 4),
                    length: read_u32(payload, 8),
                })
            }
            7 => {
                require_len(id, payload, 8)?;
                Ok(PeerMessage::Piece {
                    index: read_u32(payload, 0),
                    begin: read_u32(payload, 4),
                    block: payload[8..].to_vec(),
                })
            }
            8 => {
                require_len(id, payload, 12)?;
                Ok(PeerMessage::Cancel {
                    index: read_u32(payload, 0),
                    begin: read_u32(payload, 4),
                    length: read_u32(payload, 8),
                })
            }
            other => Err(MessageError::UnknownId(other)),
        }
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&buf[offset..offset + 4])
}

fn require_len(id: u8, payload: &[u8], expected: usize) -> MessageResult<()> {
    if payload.len() < expected {
        return Err(MessageError::ShortPayload {
            id,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Extracts every complete frame from a read buffer, consuming bytes
/// as frames are parsed and leaving an incomplete tail for the next
/// read.
pub fn extract_frames(buf: &mut BytesMut) -> MessageResult<Vec<PeerMessage>> {
    let mut messages = Vec::new();
    loop {
        if buf.len() < 4 {
            break;
        }
        let len = BigEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            break;
        }
        buf.advance(4);
        let body = buf.split_to(len);
        messages.push(PeerMessage::decode(&body)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_have() {
        let msg = PeerMessage::Have { piece_index: 7 };
        let frame = msg.encode();
        assert_eq!(frame, vec![0, 0, 0, 5, 4, 0, 0, 0, 7]);
        assert_eq!(PeerMessage::decode(&frame[4..]).unwrap(), msg);
    }

    #[test]
    fn keepalive_is_zero_length_frame() {
        let frame = PeerMessage::KeepAlive.encode();
        assert_eq!(frame, vec![0, 0, 0, 0]);
        assert_eq!(PeerMessage::decode(&[]).unwrap(), PeerMessage::KeepAlive);
    }

    #[test]
    fn request_round_trips() {
        let msg = PeerMessage::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        };
        let frame = msg.encode();
        assert_eq!(frame.len(), 4 + 13);
        assert_eq!(PeerMessage::decode(&frame[4..]).unwrap(), msg);
    }

    #[test]
    fn extract_frames_handles_partial_tail() {
        let mut buf = BytesMut::from(&PeerMessage::Unchoke.encode()[..]);
        buf.extend_from_slice(&[0, 0, 0, 9, 7]); // partial Piece frame header only.

        let messages = extract_frames(&mut buf).unwrap();
        assert_eq!(messages, vec![PeerMessage::Unchoke]);
        // the partial frame's length prefix + 1 payload byte remain buffered.
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn decode_rejects_unknown_id() {
        assert!(matches!(
            PeerMessage::decode(&[42]),
            Err(MessageError::UnknownId(42))
        ));
    }

    #[test]
    fn decode_rejects_short_have_payload() {
        assert!(matches!(
            PeerMessage::decode(&[4, 0, 0]),
            Err(MessageError::ShortPayload { id: 4, .. })
        ));
    }
}
