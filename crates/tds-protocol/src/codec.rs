//! Primitive readers and writers shared by the token parser and encoders.
//!
//! Readers return [`ProtocolError::Incomplete`] when the buffer is short so
//! the incremental token parser can wait for the missing bytes.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Fail with `Incomplete` unless `n` bytes remain.
#[inline]
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    let remaining = src.remaining();
    if remaining < n {
        return Err(ProtocolError::Incomplete {
            needed: n - remaining,
        });
    }
    Ok(())
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    ensure(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Read a string prefixed by a one-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    read_utf16(src, len)
}

/// Read a string prefixed by a two-byte character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_utf16(src, len)
}

/// Read a byte string prefixed by a one-byte length.
pub fn read_b_varbyte(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Decode a UTF-16LE byte slice.
pub fn decode_utf16_bytes(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(format!(
            "odd UTF-16 byte length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Write UTF-16LE code units with no prefix.
pub fn write_utf16(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Write a string with a one-byte character count.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let len = utf16_len(s);
    let len = u8::try_from(len).map_err(|_| ProtocolError::FieldTooLong {
        field: "B_VARCHAR",
        length: len,
        max: u8::MAX as usize,
    })?;
    dst.put_u8(len);
    write_utf16(dst, s);
    Ok(())
}

/// Write a string with a two-byte character count.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    let len = utf16_len(s);
    let len = u16::try_from(len).map_err(|_| ProtocolError::FieldTooLong {
        field: "US_VARCHAR",
        length: len,
        max: u16::MAX as usize,
    })?;
    dst.put_u16_le(len);
    write_utf16(dst, s);
    Ok(())
}

/// Number of UTF-16 code units in `s`.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
