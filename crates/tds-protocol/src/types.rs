//! Wire data types: type ids, column flags and `TYPE_INFO`.
//!
//! [`TypeInfo`] knows the wire shape of a type, which is enough to find the
//! boundaries of a value in a row without interpreting it. Typed decoding
//! lives in `mssql-types`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{ensure, read_b_varchar, read_us_varchar};
use crate::collation::Collation;
use crate::error::ProtocolError;

/// `max_length` marking a `(max)` column whose values use PLP encoding.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

/// PLP total length of a NULL value.
pub const PLP_NULL: u64 = u64::MAX;

/// PLP total length when the sender does not know the size up front.
pub const PLP_UNKNOWN_LENGTH: u64 = 0xFFFF_FFFF_FFFF_FFFE;

/// Type ids as they appear in `TYPE_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// `tinyint`.
    Int1 = 0x30,
    /// `bit`.
    Bit = 0x32,
    /// `smallint`.
    Int2 = 0x34,
    /// `int`.
    Int4 = 0x38,
    /// `bigint`.
    Int8 = 0x7F,
    /// `real`.
    Float4 = 0x3B,
    /// `float`.
    Float8 = 0x3E,
    /// `money`.
    Money = 0x3C,
    /// `smallmoney`.
    Money4 = 0x7A,
    /// `datetime`.
    DateTime = 0x3D,
    /// `smalldatetime`.
    DateTime4 = 0x3A,
    /// `uniqueidentifier`.
    Guid = 0x24,
    /// Nullable integer of 1, 2, 4 or 8 bytes.
    IntN = 0x26,
    /// Nullable bit.
    BitN = 0x68,
    /// Nullable float of 4 or 8 bytes.
    FloatN = 0x6D,
    /// Nullable money of 4 or 8 bytes.
    MoneyN = 0x6E,
    /// Nullable datetime of 4 or 8 bytes.
    DateTimeN = 0x6F,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// `decimal`.
    DecimalN = 0x6A,
    /// `numeric`.
    NumericN = 0x6C,
    /// Legacy short `char`.
    Char = 0x2F,
    /// Legacy short `varchar`.
    VarChar = 0x27,
    /// Legacy short `binary`.
    Binary = 0x2D,
    /// Legacy short `varbinary`.
    VarBinary = 0x25,
    /// `varchar(n)` / `varchar(max)`.
    BigVarChar = 0xA7,
    /// `varbinary(n)` / `varbinary(max)`.
    BigVarBinary = 0xA5,
    /// `char(n)`.
    BigChar = 0xAF,
    /// `binary(n)`.
    BigBinary = 0xAD,
    /// `nchar(n)`.
    NChar = 0xEF,
    /// `nvarchar(n)` / `nvarchar(max)`.
    NVarChar = 0xE7,
    /// `text`.
    Text = 0x23,
    /// `image`.
    Image = 0x22,
    /// `ntext`.
    NText = 0x63,
    /// `date`.
    Date = 0x28,
    /// `time(n)`.
    Time = 0x29,
    /// `datetime2(n)`.
    DateTime2 = 0x2A,
    /// `datetimeoffset(n)`.
    DateTimeOffset = 0x2B,
    /// `sql_variant`.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// `xml`.
    Xml = 0xF1,
}

impl TypeId {
    /// Decode a type byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x68 => Self::BitN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            other => return Err(ProtocolError::UnknownDataType(other)),
        })
    }

    /// Size of a value of a fixed-length type, which never carries a
    /// length prefix and cannot be NULL in a row.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether the type carries a collation in `TYPE_INFO`.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar | Self::Text | Self::NText
        )
    }

    /// Whether the type is one of the legacy `text`/`ntext`/`image` LOBs,
    /// whose values are prefixed by a text pointer and timestamp.
    #[must_use]
    pub const fn is_legacy_lob(self) -> bool {
        matches!(self, Self::Text | Self::NText | Self::Image)
    }

    /// Whether the type stores UTF-16 text.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }
}

bitflags! {
    /// Column flags from `COLMETADATA`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 1 << 0;
        /// Case-sensitive comparisons.
        const CASE_SENSITIVE = 1 << 1;
        /// Column is writable.
        const UPDATEABLE_READ_WRITE = 1 << 2;
        /// Writability is unknown.
        const UPDATEABLE_UNKNOWN = 1 << 3;
        /// Identity column.
        const IDENTITY = 1 << 4;
        /// Computed column.
        const COMPUTED = 1 << 5;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR = 1 << 8;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 1 << 10;
        /// Always Encrypted column.
        const ENCRYPTED = 1 << 11;
        /// Hidden (browse mode) column.
        const HIDDEN = 1 << 13;
        /// Key column (browse mode).
        const KEY = 1 << 14;
        /// Nullability is unknown.
        const NULLABLE_UNKNOWN = 1 << 15;
    }
}

/// How a value of a given `TYPE_INFO` is length-prefixed in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// No prefix, always present.
    Fixed(usize),
    /// One-byte length.
    Byte {
        /// Length byte that marks NULL.
        null: u8,
    },
    /// Two-byte length, `0xFFFF` marks NULL.
    UShort,
    /// Four-byte length, zero marks NULL (`sql_variant`).
    Long,
    /// Text pointer, timestamp and four-byte length (`text`/`ntext`/`image`).
    TextPointer,
    /// Partially length-prefixed chunks.
    Plp,
}

/// A column's or parameter's `TYPE_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Type id.
    pub type_id: TypeId,
    /// Declared maximum length in bytes; zero for fixed types and types
    /// with no length field.
    pub max_length: u32,
    /// Decimal precision.
    pub precision: u8,
    /// Decimal scale or fractional-second digits.
    pub scale: u8,
    /// Collation for character types.
    pub collation: Option<Collation>,
    /// Fully qualified name of a UDT.
    pub udt_type_name: Option<String>,
}

impl TypeInfo {
    /// `TYPE_INFO` with no length, precision or collation.
    #[must_use]
    pub const fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            max_length: 0,
            precision: 0,
            scale: 0,
            collation: None,
            udt_type_name: None,
        }
    }

    /// Set the maximum length.
    #[must_use]
    pub const fn with_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub const fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Set the fractional-second scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Set the collation.
    #[must_use]
    pub const fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Whether this is a `(max)` column.
    #[must_use]
    pub const fn is_max(&self) -> bool {
        matches!(
            self.type_id,
            TypeId::BigVarChar | TypeId::BigVarBinary | TypeId::NVarChar
        ) && self.max_length == MAX_LENGTH_PLP
    }

    /// Length prefix used by values of this type.
    #[must_use]
    pub const fn value_length(&self) -> ValueLength {
        if let Some(size) = self.type_id.fixed_size() {
            return ValueLength::Fixed(size);
        }
        if self.is_max() {
            return ValueLength::Plp;
        }
        match self.type_id {
            TypeId::Char | TypeId::VarChar | TypeId::Binary | TypeId::VarBinary => {
                ValueLength::Byte { null: 0xFF }
            }
            TypeId::BigVarChar
            | TypeId::BigVarBinary
            | TypeId::BigChar
            | TypeId::BigBinary
            | TypeId::NChar
            | TypeId::NVarChar => ValueLength::UShort,
            TypeId::Text | TypeId::NText | TypeId::Image => ValueLength::TextPointer,
            TypeId::Variant => ValueLength::Long,
            TypeId::Xml | TypeId::Udt => ValueLength::Plp,
            _ => ValueLength::Byte { null: 0 },
        }
    }

    /// Decode a type byte followed by its type-specific info.
    ///
    /// The table name that follows legacy LOB types in `COLMETADATA` is
    /// not part of `TYPE_INFO` and is left in `src`.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 1)?;
        let type_id = TypeId::from_u8(src.get_u8())?;
        let mut info = Self::new(type_id);

        match type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => {}

            TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Guid
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => {
                ensure(src, 1)?;
                info.max_length = u32::from(src.get_u8());
            }

            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                ensure(src, 3)?;
                info.max_length = u32::from(src.get_u8());
                info.precision = src.get_u8();
                info.scale = src.get_u8();
            }

            TypeId::BigVarChar
            | TypeId::BigChar
            | TypeId::NVarChar
            | TypeId::NChar
            | TypeId::BigVarBinary
            | TypeId::BigBinary => {
                ensure(src, 2)?;
                info.max_length = u32::from(src.get_u16_le());
                if type_id.has_collation() {
                    info.collation = Some(Collation::decode(src)?);
                }
            }

            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                ensure(src, 1)?;
                info.scale = src.get_u8();
            }

            TypeId::Text | TypeId::NText | TypeId::Image | TypeId::Variant => {
                ensure(src, 4)?;
                info.max_length = src.get_u32_le();
                if type_id.has_collation() {
                    info.collation = Some(Collation::decode(src)?);
                }
            }

            TypeId::Xml => {
                ensure(src, 1)?;
                if src.get_u8() != 0 {
                    read_b_varchar(src)?;
                    read_b_varchar(src)?;
                    read_us_varchar(src)?;
                }
            }

            TypeId::Udt => {
                ensure(src, 2)?;
                info.max_length = u32::from(src.get_u16_le());
                let database = read_b_varchar(src)?;
                let schema = read_b_varchar(src)?;
                let name = read_b_varchar(src)?;
                read_us_varchar(src)?;
                info.udt_type_name = Some(format!("{database}.{schema}.{name}"));
            }
        }

        Ok(info)
    }

    /// Write the type byte followed by its type-specific info.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => {}

            TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Guid
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => dst.put_u8(self.byte_length()?),

            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.byte_length()?);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }

            TypeId::BigVarChar
            | TypeId::BigChar
            | TypeId::NVarChar
            | TypeId::NChar
            | TypeId::BigVarBinary
            | TypeId::BigBinary => {
                let length = u16::try_from(self.max_length).map_err(|_| {
                    ProtocolError::InvalidLength {
                        length: self.max_length as usize,
                        type_name: "TYPE_INFO",
                    }
                })?;
                dst.put_u16_le(length);
                if self.type_id.has_collation() {
                    self.collation.unwrap_or_default().encode(dst);
                }
            }

            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => dst.put_u8(self.scale),

            TypeId::Text | TypeId::NText | TypeId::Image | TypeId::Variant => {
                dst.put_u32_le(self.max_length);
                if self.type_id.has_collation() {
                    self.collation.unwrap_or_default().encode(dst);
                }
            }

            TypeId::Xml => dst.put_u8(0),

            TypeId::Udt => {
                return Err(ProtocolError::UnknownDataType(self.type_id as u8));
            }
        }
        Ok(())
    }

    fn byte_length(&self) -> Result<u8, ProtocolError> {
        u8::try_from(self.max_length).map_err(|_| ProtocolError::InvalidLength {
            length: self.max_length as usize,
            type_name: "TYPE_INFO",
        })
    }

    /// Read one RPC parameter value of this type, returning `None` for NULL.
    ///
    /// Parameters of `text`, `ntext` and `image` carry a four-byte length,
    /// `0xFFFFFFFF` for NULL, and no text pointer.
    pub fn read_param_value(&self, src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
        if self.value_length() != ValueLength::TextPointer {
            return self.read_value(src);
        }
        ensure(src, 4)?;
        match src.get_u32_le() {
            u32::MAX => Ok(None),
            len => read_exact(src, len as usize).map(Some),
        }
    }

    /// Read one row value of this type, returning `None` for NULL.
    ///
    /// PLP chunks are joined; text pointers and timestamps are skipped.
    /// Fails with `Incomplete` if the value is not fully buffered.
    pub fn read_value(&self, src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
        match self.value_length() {
            ValueLength::Fixed(size) => {
                ensure(src, size)?;
                Ok(Some(src.copy_to_bytes(size)))
            }
            ValueLength::Byte { null } => {
                ensure(src, 1)?;
                let len = src.get_u8();
                if len == null {
                    return Ok(None);
                }
                read_exact(src, len as usize).map(Some)
            }
            ValueLength::UShort => {
                ensure(src, 2)?;
                let len = src.get_u16_le();
                if len == 0xFFFF {
                    return Ok(None);
                }
                read_exact(src, len as usize).map(Some)
            }
            ValueLength::Long => {
                ensure(src, 4)?;
                match src.get_u32_le() {
                    0 => Ok(None),
                    len => read_exact(src, len as usize).map(Some),
                }
            }
            ValueLength::TextPointer => {
                ensure(src, 1)?;
                let pointer_len = src.get_u8() as usize;
                if pointer_len == 0 {
                    return Ok(None);
                }
                ensure(src, pointer_len + 8 + 4)?;
                src.advance(pointer_len + 8);
                let len = src.get_u32_le() as usize;
                read_exact(src, len).map(Some)
            }
            ValueLength::Plp => read_plp(src),
        }
    }
}

fn read_exact(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read a PLP value, joining its chunks.
pub fn read_plp(src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
    ensure(src, 8)?;
    let total = src.get_u64_le();
    if total == PLP_NULL {
        return Ok(None);
    }
    if total != PLP_UNKNOWN_LENGTH {
        // Data plus the terminator; chunk headers come on top.
        ensure(src, usize::try_from(total).unwrap_or(usize::MAX).saturating_add(4))?;
    }

    let mut chunks: Vec<Bytes> = Vec::new();
    loop {
        ensure(src, 4)?;
        let chunk_len = src.get_u32_le() as usize;
        if chunk_len == 0 {
            break;
        }
        chunks.push(read_exact(src, chunk_len)?);
    }

    Ok(Some(match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.swap_remove(0),
        _ => {
            let mut joined = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in &chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        }
    }))
}
