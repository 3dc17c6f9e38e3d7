//! Collation parsing and code page resolution.
//!
//! A collation travels as five bytes: a little-endian `u32` packing the LCID
//! (bits 0..20), comparison flags (bits 20..28) and version (bits 28..32),
//! followed by a one-byte SQL sort id. Non-Unicode character data is encoded
//! in the code page derived from the sort id when it is non-zero, otherwise
//! from the LCID.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::codec::ensure;
use crate::error::ProtocolError;

/// Wire size of a collation.
pub const COLLATION_SIZE: usize = 5;

const LCID_MASK: u32 = 0x000F_FFFF;
const PRIMARY_LANGUAGE_MASK: u32 = 0x0000_FFFF;

/// Flag bit set by `_UTF8` collations.
const FLAG_UTF8: u8 = 0x80;

/// A column or session collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Collation {
    /// Windows locale id.
    pub lcid: u32,
    /// Comparison flags (ignore case, accent, kana, width, binary, UTF-8).
    pub flags: u8,
    /// Collation version.
    pub version: u8,
    /// SQL sort id, zero for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// Build a Windows collation from an LCID.
    #[must_use]
    pub const fn from_lcid(lcid: u32) -> Self {
        Self {
            lcid: lcid & LCID_MASK,
            flags: 0,
            version: 0,
            sort_id: 0,
        }
    }

    /// Decode from five wire bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, COLLATION_SIZE)?;
        let info = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self {
            lcid: info & LCID_MASK,
            flags: ((info >> 20) & 0xFF) as u8,
            version: (info >> 28) as u8,
            sort_id,
        })
    }

    /// Decode from a byte slice of exactly five bytes, as carried by the
    /// collation env-change.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != COLLATION_SIZE {
            return Err(ProtocolError::InvalidLength {
                length: bytes.len(),
                type_name: "collation",
            });
        }
        Self::decode(&mut &bytes[..])
    }

    /// Write the five wire bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let info = (self.lcid & LCID_MASK)
            | (u32::from(self.flags) << 20)
            | (u32::from(self.version & 0x0F) << 28);
        dst.put_u32_le(info);
        dst.put_u8(self.sort_id);
    }

    /// Whether character data is already UTF-8.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    /// Windows code page for non-Unicode data.
    #[must_use]
    pub fn code_page(&self) -> u16 {
        if self.is_utf8() {
            return 65001;
        }
        if self.sort_id != 0 {
            if let Some(cp) = code_page_for_sort_id(self.sort_id) {
                return cp;
            }
        }
        code_page_for_lcid(self.lcid)
    }

    /// Encoding used to convert non-Unicode data, never failing: code pages
    /// `encoding_rs` does not carry fall back to windows-1252.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        encoding_for_code_page(self.code_page()).unwrap_or(encoding_rs::WINDOWS_1252)
    }
}

/// Code page for a SQL sort id.
fn code_page_for_sort_id(sort_id: u8) -> Option<u16> {
    Some(match sort_id {
        30..=34 => 437,
        40..=44 | 49 | 55..=61 => 850,
        50..=54 | 71..=75 | 183..=186 | 210..=215 => 1252,
        80..=96 => 1250,
        104..=108 => 1251,
        112..=114 | 120..=124 => 1253,
        128..=130 => 1254,
        136..=138 => 1255,
        144..=146 => 1256,
        152..=160 => 1257,
        192 | 193 | 200 => 932,
        194 | 195 | 201 => 949,
        196 | 197 | 202 => 950,
        198 | 199 | 203 => 936,
        204..=206 => 874,
        _ => return None,
    })
}

/// Code page for a Windows LCID. Unknown locales use 1252.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> u16 {
    match lcid & PRIMARY_LANGUAGE_MASK {
        0x0411 => 932,
        0x0804 | 0x1004 => 936,
        0x0412 => 949,
        0x0404 | 0x0C04 | 0x1404 => 950,
        0x041E => 874,
        0x042A => 1258,
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424
        | 0x0418 | 0x041C => 1250,
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843
        | 0x0444 | 0x0450 | 0x0485 => 1251,
        0x0408 => 1253,
        0x041F | 0x042C => 1254,
        0x040D => 1255,
        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401
        | 0x2801 | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420
        | 0x048C | 0x0463 => 1256,
        0x0425..=0x0427 => 1257,
        _ => 1252,
    }
}

/// `encoding_rs` encoding for a Windows code page.
#[must_use]
pub fn encoding_for_code_page(code_page: u16) -> Option<&'static Encoding> {
    Some(match code_page {
        65001 => encoding_rs::UTF_8,
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GBK,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1252 => encoding_rs::WINDOWS_1252,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn latin1_general_ci_as() {
        // SQL_Latin1_General_CP1_CI_AS as sent by the server.
        let raw = [0x09, 0x04, 0xD0, 0x00, 0x34];
        let collation = Collation::from_bytes(&raw).unwrap();
        assert_eq!(collation.lcid, 0x0409);
        assert_eq!(collation.flags, 0x0D);
        assert_eq!(collation.sort_id, 0x34);
        assert_eq!(collation.code_page(), 1252);
        assert_eq!(collation.encoding(), encoding_rs::WINDOWS_1252);

        let mut out = Vec::new();
        collation.encode(&mut out);
        assert_eq!(out, raw);
    }

    #[test]
    fn windows_collation_uses_lcid() {
        let collation = Collation::from_lcid(0x0419);
        assert_eq!(collation.code_page(), 1251);
        assert_eq!(Collation::from_lcid(0x0411).encoding(), encoding_rs::SHIFT_JIS);
    }

    #[test]
    fn utf8_flag_wins() {
        let collation = Collation {
            lcid: 0x0409,
            flags: FLAG_UTF8,
            version: 2,
            sort_id: 0,
        };
        assert!(collation.is_utf8());
        assert_eq!(collation.encoding(), encoding_rs::UTF_8);
    }

    #[test]
    fn dos_code_pages_fall_back() {
        let collation = Collation {
            sort_id: 30,
            ..Collation::default()
        };
        assert_eq!(collation.code_page(), 437);
        assert_eq!(collation.encoding(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(Collation::from_bytes(&[1, 2, 3]).is_err());
    }
}
