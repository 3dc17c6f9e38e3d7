//! The [`DataType`] trait and the registry mapping wire type ids to it.
//!
//! Each SQL type family implements `DataType` once. Implementations only
//! produce and consume the bare value bytes; the length prefix (or PLP
//! framing, or text pointer) is derived from the `TYPE_INFO` so every type
//! handles NULL and `(max)` the same way.
//!
//! `text`, `ntext` and `image` are framed differently depending on where the
//! value goes: rows carry a text pointer and timestamp ahead of the length,
//! RPC parameters carry only a four-byte length.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::{PLP_NULL, TypeId, TypeInfo, ValueLength};

use crate::binary::BinaryType;
use crate::datetime::DateTimePolicy;
use crate::error::TypeError;
use crate::guid::GuidType;
use crate::numeric::{BitType, DecimalType, FloatType, IntType, MoneyType, NullType};
use crate::plp::PlpChunks;
use crate::string::{AnsiStringType, UnicodeStringType, XmlType};
use crate::temporal::{DateTimeType, DateType, DateTime2Type, DateTimeOffsetType, TimeType};
use crate::value::SqlValue;
use crate::variant::VariantType;

/// Everything a codec needs to know about the target column or parameter.
#[derive(Debug, Clone, Copy)]
pub struct ValueMeta<'a> {
    /// Declared wire type.
    pub type_info: &'a TypeInfo,
    /// Mapping between instants and the server's wall clock.
    pub policy: DateTimePolicy,
    /// Where the encoded value is written.
    pub target: Target,
}

/// Where an encoded value is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Target {
    /// An RPC parameter.
    #[default]
    Parameter,
    /// A row: bulk-load data or a server result row.
    Row,
}

impl<'a> ValueMeta<'a> {
    /// Metadata with the default (UTC) policy.
    #[must_use]
    pub const fn new(type_info: &'a TypeInfo) -> Self {
        Self {
            type_info,
            policy: DateTimePolicy::Utc,
            target: Target::Parameter,
        }
    }

    /// Frame values as row data instead of parameters.
    #[must_use]
    pub const fn in_row(mut self) -> Self {
        self.target = Target::Row;
        self
    }

    /// Use `policy` for date/time conversions.
    #[must_use]
    pub const fn with_policy(mut self, policy: DateTimePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Byte width of integer, float, money and `datetimen` types.
    pub(crate) fn width(&self) -> usize {
        self.type_info
            .type_id
            .fixed_size()
            .unwrap_or(self.type_info.max_length as usize)
    }
}

/// Data chunks of one encoded value, produced lazily.
///
/// Short values are a single chunk. `(max)` values are split into
/// length-prefixed PLP chunks followed by the zero terminator.
#[derive(Debug)]
pub struct ValueChunks(ChunksInner);

#[derive(Debug)]
enum ChunksInner {
    Empty,
    One(Option<Bytes>),
    Plp(PlpChunks),
}

impl ValueChunks {
    /// No data (NULL).
    #[must_use]
    pub const fn empty() -> Self {
        Self(ChunksInner::Empty)
    }

    /// A single chunk.
    #[must_use]
    pub const fn one(data: Bytes) -> Self {
        Self(ChunksInner::One(Some(data)))
    }

    /// PLP chunks of `data`.
    #[must_use]
    pub fn plp(data: Bytes) -> Self {
        Self(ChunksInner::Plp(PlpChunks::new(data)))
    }
}

impl Iterator for ValueChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        match &mut self.0 {
            ChunksInner::Empty => None,
            ChunksInner::One(data) => data.take(),
            ChunksInner::Plp(chunks) => chunks.next(),
        }
    }
}

/// Codec for one family of SQL types.
pub trait DataType: Send + Sync + fmt::Debug {
    /// Primary wire type id of the family.
    fn id(&self) -> TypeId;

    /// SQL name of the family.
    fn name(&self) -> &'static str;

    /// Declaration text for `sp_executesql` and `INSERT BULK`, such as
    /// `nvarchar(50)` or `decimal(18, 2)`.
    fn declaration(&self, info: &TypeInfo) -> String;

    /// Coerce `value` to this type and check it against the declared
    /// length, precision and range.
    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError>;

    /// Encode a non-NULL value to its bare data bytes.
    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError>;

    /// Decode bare data bytes; `None` is NULL.
    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError>;

    /// Write `TYPE_INFO` for a parameter or bulk-load column.
    fn write_type_info(&self, meta: &ValueMeta<'_>, dst: &mut BytesMut) -> Result<(), TypeError> {
        meta.type_info.encode(dst)?;
        Ok(())
    }

    /// Length prefix for `value`.
    fn write_length(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let len = if value.is_null() {
            None
        } else {
            Some(self.encode_data(value, meta)?.len())
        };
        prefix_for(meta, len)
    }

    /// Data chunks for `value`.
    fn encode(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<ValueChunks, TypeError> {
        if value.is_null() {
            return Ok(ValueChunks::empty());
        }
        let data = self.encode_data(value, meta)?;
        Ok(if meta.type_info.value_length() == ValueLength::Plp {
            ValueChunks::plp(data)
        } else {
            ValueChunks::one(data)
        })
    }

    /// Length prefix followed by data chunks, computing the data once.
    fn encode_value(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Vec<Bytes>, TypeError> {
        if value.is_null() {
            return Ok(vec![prefix_for(meta, None)?]);
        }
        let data = self.encode_data(value, meta)?;
        let mut out = vec![prefix_for(meta, Some(data.len()))?];
        if meta.type_info.value_length() == ValueLength::Plp {
            out.extend(PlpChunks::new(data));
        } else {
            out.push(data);
        }
        Ok(out)
    }
}

fn prefix_for(meta: &ValueMeta<'_>, len: Option<usize>) -> Result<Bytes, TypeError> {
    match meta.target {
        Target::Parameter => length_prefix(meta.type_info, len),
        Target::Row => row_length_prefix(meta.type_info, len),
    }
}

/// Row framing: `text`, `ntext` and `image` get the text pointer and
/// timestamp ahead of the length, or a single zero byte for NULL.
pub fn row_length_prefix(info: &TypeInfo, len: Option<usize>) -> Result<Bytes, TypeError> {
    if info.value_length() != ValueLength::TextPointer {
        return length_prefix(info, len);
    }
    let mut buf = BytesMut::with_capacity(1 + 24 + 4);
    match len {
        None => buf.put_u8(0),
        Some(len) => {
            let len = u32::try_from(len)
                .ok()
                .filter(|&n| n <= i32::MAX as u32)
                .ok_or_else(|| TypeError::TooLong {
                    type_name: type_name(info.type_id),
                    length: len,
                    max: i32::MAX as usize,
                })?;
            buf.put_u8(0x10);
            buf.put_bytes(0, 16 + 8);
            buf.put_u32_le(len);
        }
    }
    Ok(buf.freeze())
}

/// Parameter framing for a value of `len` bytes, or NULL when `len` is
/// `None`.
pub fn length_prefix(info: &TypeInfo, len: Option<usize>) -> Result<Bytes, TypeError> {
    let too_long = |len: usize, max: usize| TypeError::TooLong {
        type_name: type_name(info.type_id),
        length: len,
        max,
    };

    let mut buf = BytesMut::with_capacity(8);
    match (info.value_length(), len) {
        (ValueLength::Fixed(_), None) => return Err(TypeError::NullNotAllowed(type_name(info.type_id))),
        (ValueLength::Fixed(size), Some(len)) => {
            if len != size {
                return Err(TypeError::InvalidBinary(format!(
                    "{} needs {size} bytes, got {len}",
                    type_name(info.type_id)
                )));
            }
        }
        (ValueLength::Byte { null }, None) => buf.put_u8(null),
        (ValueLength::Byte { null }, Some(len)) => {
            let byte = u8::try_from(len)
                .ok()
                .filter(|&b| b != null)
                .ok_or_else(|| too_long(len, 0xFE))?;
            buf.put_u8(byte);
        }
        (ValueLength::UShort, None) => buf.put_u16_le(0xFFFF),
        (ValueLength::UShort, Some(len)) => {
            let short = u16::try_from(len)
                .ok()
                .filter(|&n| n != 0xFFFF)
                .ok_or_else(|| too_long(len, 0xFFFE))?;
            buf.put_u16_le(short);
        }
        (ValueLength::Long, None) => buf.put_u32_le(0),
        (ValueLength::Long, Some(len)) => {
            buf.put_u32_le(u32::try_from(len).map_err(|_| too_long(len, u32::MAX as usize))?);
        }
        (ValueLength::TextPointer, None) => buf.put_u32_le(u32::MAX),
        (ValueLength::TextPointer, Some(len)) => {
            let len = u32::try_from(len)
                .ok()
                .filter(|&n| n <= i32::MAX as u32)
                .ok_or_else(|| too_long(len, i32::MAX as usize))?;
            buf.put_u32_le(len);
        }
        (ValueLength::Plp, None) => buf.put_u64_le(PLP_NULL),
        (ValueLength::Plp, Some(len)) => buf.put_u64_le(len as u64),
    }
    Ok(buf.freeze())
}

/// Codec for `type_id`.
#[must_use]
pub fn data_type(type_id: TypeId) -> &'static dyn DataType {
    match type_id {
        TypeId::Null => &NullType,
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => &IntType,
        TypeId::Bit | TypeId::BitN => &BitType,
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => &FloatType,
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => &MoneyType,
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => &DecimalType,
        TypeId::Guid => &GuidType,
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => &AnsiStringType,
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => &UnicodeStringType,
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image
        | TypeId::Udt => &BinaryType,
        TypeId::Xml => &XmlType,
        TypeId::Date => &DateType,
        TypeId::Time => &TimeType,
        TypeId::DateTime2 => &DateTime2Type,
        TypeId::DateTimeOffset => &DateTimeOffsetType,
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => &DateTimeType,
        TypeId::Variant => &VariantType,
    }
}

/// SQL name for error messages.
#[must_use]
pub fn type_name(type_id: TypeId) -> &'static str {
    data_type(type_id).name()
}

/// Default `TYPE_INFO` for sending `value` as a parameter.
///
/// Strings go as `nvarchar`, switching to `(max)` above 4000 code units;
/// instants go as `datetime2(7)` on the policy's wall clock.
#[must_use]
pub fn infer_type_info(value: &SqlValue) -> TypeInfo {
    match value {
        SqlValue::Null => TypeInfo::new(TypeId::NVarChar).with_length(2),
        SqlValue::Bool(_) => TypeInfo::new(TypeId::BitN).with_length(1),
        SqlValue::TinyInt(_) => TypeInfo::new(TypeId::IntN).with_length(1),
        SqlValue::SmallInt(_) => TypeInfo::new(TypeId::IntN).with_length(2),
        SqlValue::Int(_) => TypeInfo::new(TypeId::IntN).with_length(4),
        SqlValue::BigInt(_) => TypeInfo::new(TypeId::IntN).with_length(8),
        SqlValue::Float(_) => TypeInfo::new(TypeId::FloatN).with_length(4),
        SqlValue::Double(_) => TypeInfo::new(TypeId::FloatN).with_length(8),
        SqlValue::Decimal(d) => TypeInfo::new(TypeId::DecimalN)
            .with_length(17)
            .with_precision(38, d.scale().min(38) as u8),
        SqlValue::Numeric(n) => TypeInfo::new(TypeId::DecimalN)
            .with_length(17)
            .with_precision(38, n.scale()),
        SqlValue::String(s) => {
            let bytes = s.encode_utf16().count() * 2;
            TypeInfo::new(TypeId::NVarChar).with_length(if bytes > 8000 {
                tds_protocol::MAX_LENGTH_PLP
            } else {
                8000
            })
        }
        SqlValue::Binary(b) => TypeInfo::new(TypeId::BigVarBinary).with_length(if b.len() > 8000 {
            tds_protocol::MAX_LENGTH_PLP
        } else {
            8000
        }),
        SqlValue::Uuid(_) => TypeInfo::new(TypeId::Guid).with_length(16),
        SqlValue::Date(_) => TypeInfo::new(TypeId::Date),
        SqlValue::Time(_) => TypeInfo::new(TypeId::Time).with_scale(7),
        SqlValue::DateTime(_) | SqlValue::Timestamp(_) => TypeInfo::new(TypeId::DateTime2).with_scale(7),
        SqlValue::DateTimeOffset(_) => TypeInfo::new(TypeId::DateTimeOffset).with_scale(7),
        SqlValue::Xml(_) => TypeInfo::new(TypeId::Xml),
    }
}

/// Encode `value` as `info` in one call: validate, then length prefix and
/// data chunks.
pub fn encode_param(value: SqlValue, meta: &ValueMeta<'_>) -> Result<Vec<Bytes>, TypeError> {
    let codec = data_type(meta.type_info.type_id);
    let value = codec.validate(value, meta)?;
    codec.encode_value(&value, meta)
}

/// Decode one raw row value.
pub fn decode_value(raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
    data_type(meta.type_info.type_id).decode(raw, meta)
}

pub(crate) fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    TypeError::TypeMismatch {
        expected,
        actual: value.type_name(),
    }
}
