//! Character types: collation-encoded `char`/`varchar`/`text`, UTF-16
//! `nchar`/`nvarchar`/`ntext`, and `xml`.

use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use tds_protocol::codec::{decode_utf16_bytes, utf16_len, write_utf16};
use tds_protocol::{TypeId, TypeInfo};

use crate::data_type::{DataType, ValueMeta, mismatch};
use crate::error::TypeError;
use crate::value::SqlValue;

fn text<'v>(value: &'v SqlValue, expected: &'static str) -> Result<&'v str, TypeError> {
    value.as_str().ok_or_else(|| mismatch(expected, value))
}

/// Whether `info` has no length limit to check against.
fn unbounded(info: &TypeInfo) -> bool {
    info.is_max() || info.type_id.is_legacy_lob()
}

fn check_length(info: &TypeInfo, type_name: &'static str, length: usize) -> Result<(), TypeError> {
    let max = info.max_length as usize;
    if !unbounded(info) && length > max {
        return Err(TypeError::TooLong {
            type_name,
            length,
            max,
        });
    }
    Ok(())
}

fn length_or_max(info: &TypeInfo, chars: u32) -> String {
    if info.is_max() {
        "max".to_owned()
    } else {
        chars.max(1).to_string()
    }
}

/// `char`, `varchar` and `text`, encoded with the column collation's code
/// page.
#[derive(Debug)]
pub struct AnsiStringType;

impl AnsiStringType {
    fn encoding(info: &TypeInfo) -> &'static Encoding {
        info.collation
            .as_ref()
            .map_or(encoding_rs::WINDOWS_1252, |c| c.encoding())
    }

    fn to_bytes(value: &SqlValue, info: &TypeInfo) -> Result<Bytes, TypeError> {
        let s = text(value, "varchar")?;
        let encoding = Self::encoding(info);
        let (encoded, _, unmappable) = encoding.encode(s);
        if unmappable {
            return Err(TypeError::InvalidEncoding(format!(
                "text not representable in {}",
                encoding.name()
            )));
        }
        Ok(Bytes::copy_from_slice(&encoded))
    }
}

impl DataType for AnsiStringType {
    fn id(&self) -> TypeId {
        TypeId::BigVarChar
    }

    fn name(&self) -> &'static str {
        "varchar"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        match info.type_id {
            TypeId::Text => "text".to_owned(),
            TypeId::Char | TypeId::BigChar => format!("char({})", info.max_length.max(1)),
            _ => format!("varchar({})", length_or_max(info, info.max_length)),
        }
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let bytes = Self::to_bytes(&value, meta.type_info)?;
        check_length(meta.type_info, "varchar", bytes.len())?;
        match value {
            SqlValue::Xml(s) => Ok(SqlValue::String(s)),
            other => Ok(other),
        }
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Self::to_bytes(value, meta.type_info)
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        let (decoded, _) = Self::encoding(meta.type_info).decode_without_bom_handling(&raw);
        Ok(SqlValue::String(decoded.into_owned()))
    }
}

/// `nchar`, `nvarchar` and `ntext`.
#[derive(Debug)]
pub struct UnicodeStringType;

impl DataType for UnicodeStringType {
    fn id(&self) -> TypeId {
        TypeId::NVarChar
    }

    fn name(&self) -> &'static str {
        "nvarchar"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        match info.type_id {
            TypeId::NText => "ntext".to_owned(),
            TypeId::NChar => format!("nchar({})", (info.max_length / 2).max(1)),
            _ => format!("nvarchar({})", length_or_max(info, info.max_length / 2)),
        }
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        check_length(meta.type_info, "nvarchar", utf16_len(text(&value, "nvarchar")?) * 2)?;
        match value {
            SqlValue::Xml(s) => Ok(SqlValue::String(s)),
            other => Ok(other),
        }
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let s = text(value, "nvarchar")?;
        let mut buf = BytesMut::with_capacity(s.len() * 2);
        write_utf16(&mut buf, s);
        Ok(buf.freeze())
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        decode_utf16_bytes(&raw)
            .map(SqlValue::String)
            .map_err(|e| TypeError::InvalidEncoding(e.to_string()))
    }
}

/// `xml`, always sent and received as UTF-16.
#[derive(Debug)]
pub struct XmlType;

const UTF16_BOM: [u8; 2] = [0xFF, 0xFE];

impl DataType for XmlType {
    fn id(&self) -> TypeId {
        TypeId::Xml
    }

    fn name(&self) -> &'static str {
        "xml"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "xml".to_owned()
    }

    fn validate(&self, value: SqlValue, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        match value {
            SqlValue::Null | SqlValue::Xml(_) => Ok(value),
            SqlValue::String(s) => Ok(SqlValue::Xml(s)),
            other => Err(mismatch("xml", &other)),
        }
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let s = text(value, "xml")?;
        let mut buf = BytesMut::with_capacity(s.len() * 2);
        write_utf16(&mut buf, s);
        Ok(buf.freeze())
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        let body = raw.strip_prefix(&UTF16_BOM[..]).unwrap_or(&raw);
        decode_utf16_bytes(body)
            .map(SqlValue::Xml)
            .map_err(|e| TypeError::InvalidEncoding(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{Collation, MAX_LENGTH_PLP};

    #[test]
    fn nvarchar_length_is_checked_in_bytes() {
        let info = TypeInfo::new(TypeId::NVarChar).with_length(10);
        let meta = ValueMeta::new(&info);
        assert!(UnicodeStringType.validate(SqlValue::from("abcde"), &meta).is_ok());
        assert!(matches!(
            UnicodeStringType.validate(SqlValue::from("abcdef"), &meta),
            Err(TypeError::TooLong { length: 12, max: 10, .. })
        ));

        let max = TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP);
        assert!(UnicodeStringType
            .validate(SqlValue::from("x".repeat(100_000)), &ValueMeta::new(&max))
            .is_ok());
    }

    #[test]
    fn declarations() {
        let nvarchar = TypeInfo::new(TypeId::NVarChar).with_length(100);
        assert_eq!(UnicodeStringType.declaration(&nvarchar), "nvarchar(50)");
        let max = TypeInfo::new(TypeId::BigVarChar).with_length(MAX_LENGTH_PLP);
        assert_eq!(AnsiStringType.declaration(&max), "varchar(max)");
        assert_eq!(AnsiStringType.declaration(&TypeInfo::new(TypeId::Text)), "text");
    }

    #[test]
    fn varchar_uses_collation_code_page() {
        let info = TypeInfo::new(TypeId::BigVarChar)
            .with_length(10)
            .with_collation(Collation::from_lcid(0x0409));
        let meta = ValueMeta::new(&info);
        let data = AnsiStringType.encode_data(&SqlValue::from("café"), &meta).unwrap();
        assert_eq!(&data[..], b"caf\xE9");
        assert_eq!(
            AnsiStringType.decode(Some(data), &meta).unwrap(),
            SqlValue::from("café")
        );
    }

    #[test]
    fn unmappable_characters_are_rejected() {
        let info = TypeInfo::new(TypeId::BigVarChar).with_length(10);
        assert!(matches!(
            AnsiStringType.validate(SqlValue::from("日本"), &ValueMeta::new(&info)),
            Err(TypeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn xml_strips_byte_order_mark() {
        let info = TypeInfo::new(TypeId::Xml);
        let raw = Bytes::from_static(&[0xFF, 0xFE, b'<', 0, b'a', 0, b'/', 0, b'>', 0]);
        assert_eq!(
            XmlType.decode(Some(raw), &ValueMeta::new(&info)).unwrap(),
            SqlValue::Xml("<a/>".to_owned())
        );
    }
}
