//! Framing for both transports.
//!
//! A protobuf message does not say where it ends, so each transport adds a
//! little framing around the encoded [`Envelope`]:
//!
//! - **Stream (TCP)**: a varint length prefix, then the message. A prefix of
//!   zero is a heartbeat: one `0x00` byte that keeps the connection warm
//!   and carries nothing.
//! - **Datagram (UDP)**: a one-byte header, then the message, one envelope
//!   per datagram.
//!
//! ```text
//! stream:    [len varint][envelope bytes][len varint][envelope bytes]...
//! datagram:  [header][envelope bytes]
//!
//! header bits:  1 . . . . . . .   heartbeat (no body)
//!               . 1 . . . . . .   start of sequence
//!               . . 1 . . . . .   end of sequence
//! ```
//!
//! Fragmentation is not implemented, so every message datagram carries both
//! the start and end bits.

use bytes::{Buf, BytesMut};
use prost::Message;

use crate::ProtocolError;
use crate::types::Envelope;

/// Largest frame a [`FrameDecoder`] accepts by default (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Datagram header bit: heartbeat, no body follows.
pub const HEADER_HEARTBEAT: u8 = 0x80;
/// Datagram header bit: first fragment of a message.
pub const HEADER_START: u8 = 0x40;
/// Datagram header bit: last fragment of a message.
pub const HEADER_END: u8 = 0x20;

/// A varint never needs more than 10 bytes.
const MAX_VARINT_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// Encodes an envelope as one length-prefixed stream frame.
pub fn encode_frame(envelope: &Envelope) -> Vec<u8> {
    envelope.encode_length_delimited_to_vec()
}

/// Incremental decoder for length-prefixed envelopes.
///
/// Feed it the connection's read buffer; it consumes complete frames and
/// leaves partial ones in place for the next read.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Decodes the next envelope from `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame.
    /// Heartbeat frames are consumed silently.
    ///
    /// # Errors
    ///
    /// Any error means the stream position is lost; the caller must drop
    /// the connection.
    pub fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Envelope>, ProtocolError> {
        loop {
            let Some((len, prefix_len)) = peek_varint(buf)? else {
                return Ok(None);
            };
            let len = usize::try_from(len).unwrap_or(usize::MAX);

            if len == 0 {
                buf.advance(prefix_len);
                continue;
            }

            if len > self.max_frame_len {
                return Err(ProtocolError::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                });
            }

            let total = prefix_len + len;
            if buf.len() < total {
                buf.reserve(total - buf.len());
                return Ok(None);
            }

            buf.advance(prefix_len);
            let frame = buf.split_to(len).freeze();
            let envelope = Envelope::decode(frame)?;
            return require_payload(envelope).map(Some);
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a varint from the front of `buf` without consuming it.
///
/// Returns the value and the number of bytes it occupies, or `None` if the
/// varint is not complete yet.
fn peek_varint(buf: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::Malformed(
            "length prefix longer than 10 bytes".into(),
        ));
    }
    Ok(None)
}

fn require_payload(envelope: Envelope) -> Result<Envelope, ProtocolError> {
    if envelope.payload.is_none() {
        return Err(ProtocolError::InvalidMessage(format!(
            "envelope {} has no payload",
            envelope.msg_id
        )));
    }
    Ok(envelope)
}

// ---------------------------------------------------------------------------
// Datagram framing
// ---------------------------------------------------------------------------

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    Heartbeat,
    Envelope(Envelope),
}

/// Encodes an envelope as a single datagram.
pub fn encode_datagram(envelope: &Envelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + envelope.encoded_len());
    out.push(HEADER_START | HEADER_END);
    // Writing into a Vec cannot run out of space.
    let _ = envelope.encode(&mut out);
    out
}

/// The keepalive datagram.
pub fn encode_heartbeat() -> [u8; 1] {
    [HEADER_HEARTBEAT | HEADER_START | HEADER_END]
}

/// Decodes one received datagram.
pub fn decode_datagram(data: &[u8]) -> Result<Datagram, ProtocolError> {
    let Some((&header, body)) = data.split_first() else {
        return Err(ProtocolError::Malformed("empty datagram".into()));
    };
    if header & HEADER_HEARTBEAT == HEADER_HEARTBEAT {
        return Ok(Datagram::Heartbeat);
    }
    let envelope = Envelope::decode(body)?;
    require_payload(envelope).map(Datagram::Envelope)
}

// =========================================================================
// Tests
// =========================================================================
