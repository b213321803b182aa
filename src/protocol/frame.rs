//! Packet framing. Every wire packet is a 3-byte little-endian payload
//! length, a sequence byte and the payload.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 4;

/// One complete wire packet, header included. Frames keep the raw bytes so a
/// paired connection can forward them untouched apart from the sequence byte.
#[derive(Debug)]
pub struct Frame {
    bytes: BytesMut,
}

impl Frame {
    pub fn seq(&self) -> u8 {
        self.bytes[3]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    pub fn payload_len(&self) -> usize {
        self.bytes.len() - HEADER_LEN
    }

    /// First payload byte, the "field count byte" the state machine keys on.
    pub fn first_byte(&self) -> u8 {
        self.payload().first().copied().unwrap_or(0)
    }

    /// The packet exactly as it appeared on the wire.
    pub fn as_wire(&self) -> &[u8] {
        &self.bytes
    }
}

/// Splits the next complete packet off the front of `buf`. Returns `Ok(None)`
/// when more bytes are needed.
///
/// A zero-length packet with sequence 0xff marks a >16 MiB continuation,
/// which is not supported and closes the connection.
pub fn next_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], 0]) as usize;
    let seq = buf[3];
    if len == 0 && seq == 0xff {
        return Err(ProtocolError::UnsupportedContinuation);
    }
    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(Frame {
        bytes: buf.split_to(total),
    }))
}

/// Writes a packet header for a payload of `payload_len` bytes.
pub fn write_header(dst: &mut BytesMut, payload_len: usize, seq: u8) {
    dst.put_uint_le(payload_len as u64, 3);
    dst.put_u8(seq);
}
