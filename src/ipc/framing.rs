//! Wire protocol codec for the presence IPC socket.
//!
//! Every frame is an 8-byte header followed by a UTF-8 JSON body:
//!
//! ```text
//! [u32 LE opcode] [u32 LE length] [payload: length bytes of JSON]
//! ```
//!
//! There is no padding, checksum or trailing delimiter. A single socket read
//! may carry several frames or only part of one, so inbound bytes go through
//! [`FrameDecoder`] before reaching [`Frame::decode`].

use anyhow::{bail, Result};
use bytes::{Buf, BytesMut};
use serde_json::Value;

use crate::constants::MAX_FRAME_SIZE;

/// Size of the fixed frame header (opcode + length).
pub const HEADER_LEN: usize = 8;

/// Protocol-defined operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    /// Client → host identification, first frame on every connection.
    Handshake = 0,
    /// Command or event carrying a JSON body.
    Frame = 1,
    /// Connection is being closed; body carries `code` and `message`.
    Close = 2,
    /// Keepalive request.
    Ping = 3,
    /// Keepalive response.
    Pong = 4,
}

impl OpCode {
    /// Map a raw header value onto a known opcode.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

impl From<OpCode> for u32 {
    fn from(op: OpCode) -> Self {
        op as u32
    }
}

/// A single decoded frame.
///
/// `json` is `None` whenever the payload is not valid JSON. Such frames are
/// still dispatched; consumers must tolerate a missing body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw opcode from the header.
    pub op: u32,
    /// Payload length as declared by the sender.
    pub length: u32,
    /// Payload bytes following the header.
    pub payload: Vec<u8>,
    /// Parsed payload, if it was valid JSON.
    pub json: Option<Value>,
}

impl Frame {
    /// Decode one complete frame.
    ///
    /// Never fails: missing header bytes read as zero, the payload is capped
    /// at the declared length, and unparseable payloads yield `json: None`.
    pub fn decode(bytes: &[u8]) -> Self {
        let op = read_u32_le(bytes, 0);
        let length = read_u32_le(bytes, 4);

        let start = HEADER_LEN.min(bytes.len());
        let end = start
            .saturating_add(length as usize)
            .min(bytes.len());
        let payload = bytes[start..end].to_vec();
        let json = serde_json::from_slice(&payload).ok();

        Self {
            op,
            length,
            payload,
            json,
        }
    }

    /// Known opcode, or `None` for values outside the protocol.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u32(self.op)
    }

    /// String field at the top level of the JSON body.
    pub fn json_str(&self, key: &str) -> Option<&str> {
        self.json.as_ref()?.get(key)?.as_str()
    }

    /// Value of the `cmd` field, if any.
    pub fn cmd(&self) -> Option<&str> {
        self.json_str("cmd")
    }

    /// Value of the `evt` field, if any.
    pub fn evt(&self) -> Option<&str> {
        self.json_str("evt")
    }
}

/// Encode an opcode and JSON value into wire format.
pub fn encode(op: OpCode, value: &Value) -> Vec<u8> {
    // Value serialization only fails for non-string map keys, which Value cannot hold.
    let payload = serde_json::to_vec(value).unwrap_or_default();
    encode_raw(op.into(), &payload)
}

/// Encode a header plus an arbitrary payload.
pub fn encode_raw(op: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&op.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    for (i, slot) in word.iter_mut().enumerate() {
        if let Some(b) = bytes.get(offset + i) {
            *slot = *b;
        }
    }
    u32::from_le_bytes(word)
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
/// Surplus bytes stay buffered for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns an error if a header declares a payload above the size limit.
    /// The stream cannot be resynchronised after that.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while self.buf.len() >= HEADER_LEN {
            let length = read_u32_le(&self.buf, 4);
            if length > MAX_FRAME_SIZE {
                bail!("Frame too large: {length} bytes (max {MAX_FRAME_SIZE})");
            }

            let total = HEADER_LEN + length as usize;
            if self.buf.len() < total {
                break; // Incomplete frame, wait for more data
            }

            frames.push(Frame::decode(&self.buf[..total]));
            self.buf.advance(total);
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
