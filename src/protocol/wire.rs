//! Byte-level primitives shared by every packet codec: little-endian
//! fixed-width integers (via `bytes`), MySQL length-encoded integers and the
//! string flavors built on them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Sentinel mapped to the SQL NULL marker (0xfb) in length-encoded fields.
pub const LENENC_NULL: u64 = u64::MAX;

pub(crate) fn need(buf: &impl Buf, n: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        Err(ProtocolError::Truncated(what))
    } else {
        Ok(())
    }
}

/// Reads a length-encoded integer. The tag byte picks the width; 0xfb is the
/// SQL NULL marker and maps to [`LENENC_NULL`].
///
/// The 0xfd tag is followed by 3 bytes. The protocol documentation and some
/// legacy decoders disagree on whether that width is 3 or 4; this codec uses
/// the documented 3 on both encode and decode.
pub fn read_lenenc_int(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    need(buf, 1, "lenenc int tag")?;
    let tag = buf.get_u8();
    match tag {
        0x00..=0xfa => Ok(tag as u64),
        0xfb => Ok(LENENC_NULL),
        0xfc => {
            need(buf, 2, "lenenc u16")?;
            Ok(buf.get_u16_le() as u64)
        }
        0xfd => {
            need(buf, 3, "lenenc u24")?;
            Ok(buf.get_uint_le(3))
        }
        0xfe => {
            need(buf, 8, "lenenc u64")?;
            Ok(buf.get_u64_le())
        }
        0xff => Err(ProtocolError::InvalidLenencTag),
    }
}

/// Writes `value` in the narrowest length-encoded form.
pub fn write_lenenc_int(dst: &mut BytesMut, value: u64) {
    if value < 251 {
        dst.put_u8(value as u8);
    } else if value < 65_536 {
        dst.put_u8(0xfc);
        dst.put_u16_le(value as u16);
    } else if value < 16_777_216 {
        dst.put_u8(0xfd);
        dst.put_uint_le(value, 3);
    } else if value == LENENC_NULL {
        dst.put_u8(0xfb);
    } else {
        dst.put_u8(0xfe);
        dst.put_u64_le(value);
    }
}

/// Encoded width of `value`, for pre-sizing wire buffers.
pub fn lenenc_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 65_536 {
        3
    } else if value < 16_777_216 {
        4
    } else if value == LENENC_NULL {
        1
    } else {
        9
    }
}

/// Reads a length-prefixed byte string. A NULL length yields an empty slice.
pub fn read_lenenc_bytes(buf: &mut &[u8]) -> Result<Bytes, ProtocolError> {
    let len = read_lenenc_int(buf)?;
    if len == LENENC_NULL {
        return Ok(Bytes::new());
    }
    let len = len as usize;
    need(buf, len, "lenenc string body")?;
    let out = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(out)
}

/// Writes a length-prefixed byte string.
pub fn write_lenenc_bytes(dst: &mut BytesMut, bytes: &[u8]) {
    write_lenenc_int(dst, bytes.len() as u64);
    dst.put_slice(bytes);
}

/// Reads a NUL-terminated string, consuming the terminator.
pub fn read_nul_string(buf: &mut &[u8], what: &'static str) -> Result<String, ProtocolError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::MissingTerminator(what))?;
    let s = String::from_utf8_lossy(&buf[..pos]).into_owned();
    buf.advance(pos + 1);
    Ok(s)
}

/// Reads a string running to the next NUL or to the end of the buffer.
/// Trailing optional packet fields are encoded this way.
pub fn read_trailing_string(buf: &mut &[u8]) -> String {
    let pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let s = String::from_utf8_lossy(&buf[..pos]).into_owned();
    buf.advance(buf.len().min(pos + 1));
    s
}
