//! Decoded SQL values.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::datetime::DateTimePolicy;
use crate::error::TypeError;
use crate::numeric::Numeric;

/// A single SQL value.
///
/// Rows decode into these; parameters and bulk-load cells are built from
/// them. `Timestamp` only appears on the way in: it is an instant that the
/// connection's [`DateTimePolicy`] maps onto the server's wall clock.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL.
    #[default]
    Null,
    /// `bit`.
    Bool(bool),
    /// `tinyint`.
    TinyInt(u8),
    /// `smallint`.
    SmallInt(i16),
    /// `int`.
    Int(i32),
    /// `bigint`.
    BigInt(i64),
    /// `real`.
    Float(f32),
    /// `float`.
    Double(f64),
    /// `decimal`, `numeric`, `money` and `smallmoney`.
    Decimal(Decimal),
    /// `decimal` or `numeric` too wide for [`Decimal`].
    Numeric(Numeric),
    /// Character data of any width.
    String(String),
    /// `binary`, `varbinary`, `image` and UDT payloads.
    Binary(Bytes),
    /// `uniqueidentifier`.
    Uuid(Uuid),
    /// `date`.
    Date(NaiveDate),
    /// `time`.
    Time(NaiveTime),
    /// `datetime`, `smalldatetime` and `datetime2` wall clock.
    DateTime(NaiveDateTime),
    /// `datetimeoffset`.
    DateTimeOffset(DateTime<FixedOffset>),
    /// A zone-aware instant supplied by the caller.
    Timestamp(DateTime<Utc>),
    /// `xml`.
    Xml(String),
}

impl SqlValue {
    /// Whether the value is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL name of the value's natural type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "bit",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "real",
            Self::Double(_) => "float",
            Self::Decimal(_) | Self::Numeric(_) => "decimal",
            Self::String(_) => "nvarchar",
            Self::Binary(_) => "varbinary",
            Self::Uuid(_) => "uniqueidentifier",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime2",
            Self::DateTimeOffset(_) | Self::Timestamp(_) => "datetimeoffset",
            Self::Xml(_) => "xml",
        }
    }

    /// Integer value widened to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::TinyInt(v) => Some(i64::from(v)),
            Self::SmallInt(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::BigInt(v) => Some(v),
            Self::Bool(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    /// Integer value if it fits in `i32`.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Floating point value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Text of a character or XML value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Xml(v) => Some(v),
            _ => None,
        }
    }

    /// Bytes of a binary value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Decimal value, converting integers exactly. Wide values only convert
    /// when no digits are lost.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(v) => Some(*v),
            Self::Numeric(v) => v.to_decimal(),
            other => other.as_i64().map(Decimal::from),
        }
    }

    /// The instant this value denotes, reading wall-clock values through
    /// `policy`.
    pub fn as_instant(&self, policy: DateTimePolicy) -> Result<Option<DateTime<Utc>>, TypeError> {
        Ok(match self {
            Self::Timestamp(v) => Some(*v),
            Self::DateTimeOffset(v) => Some(v.with_timezone(&Utc)),
            Self::DateTime(v) => Some(policy.instant(*v)?),
            Self::Date(v) => Some(policy.instant(v.and_time(NaiveTime::MIN))?),
            _ => None,
        })
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    u8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    Numeric => Numeric,
    String => String,
    Bytes => Binary,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(v))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
