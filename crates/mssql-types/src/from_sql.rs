//! Trait for converting from SQL values to Rust types.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::datetime::DateTimePolicy;
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Trait for types that can be converted from SQL values.
///
/// Integer conversions widen freely and narrow only when the value fits.
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert from an optional SQL value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name(),
        }
    }
}

macro_rules! impl_from_sql_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    let wide = value.as_i64().ok_or_else(|| mismatch($name, value))?;
                    <$ty>::try_from(wide).map_err(|_| TypeError::OutOfRange {
                        target_type: $name,
                        value: wide.to_string(),
                    })
                }
            }
        )*
    };
}

impl_from_sql_int! {
    u8 => "u8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            other => other.as_i64().map(|v| v != 0).ok_or_else(|| mismatch("bool", other)),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            other => Err(mismatch("f32", other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(d) => f64::try_from(*d).map_err(|e| TypeError::InvalidDecimal(e.to_string())),
            SqlValue::Numeric(n) => n
                .to_string()
                .parse()
                .map_err(|e: std::num::ParseFloatError| TypeError::InvalidDecimal(e.to_string())),
            other => other
                .as_f64()
                .or_else(|| other.as_i64().map(|v| v as f64))
                .ok_or_else(|| mismatch("f64", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Uuid(u) => Ok(u.to_string()),
            other => other.as_str().map(str::to_owned).ok_or_else(|| mismatch("String", other)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_bytes().map(<[u8]>::to_vec).ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(b) => Ok(b.clone()),
            other => Err(mismatch("Bytes", other)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

impl FromSql for Uuid {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Uuid(v) => Ok(*v),
            SqlValue::String(s) => Uuid::parse_str(s).map_err(|e| TypeError::InvalidBinary(e.to_string())),
            other => Err(mismatch("Uuid", other)),
        }
    }
}

impl FromSql for Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Numeric(n) => n.to_decimal().ok_or_else(|| TypeError::OutOfRange {
                target_type: "Decimal",
                value: n.to_string(),
            }),
            other => other.as_decimal().ok_or_else(|| mismatch("Decimal", other)),
        }
    }
}

impl FromSql for Numeric {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Numeric(n) => Ok(*n),
            other => other.as_decimal().map(Numeric::from).ok_or_else(|| mismatch("Numeric", other)),
        }
    }
}

impl FromSql for NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::DateTime(v) => Ok(v.date()),
            other => Err(mismatch("NaiveDate", other)),
        }
    }
}

impl FromSql for NaiveTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Time(v) => Ok(*v),
            other => Err(mismatch("NaiveTime", other)),
        }
    }
}

impl FromSql for NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::DateTime(v) => Ok(*v),
            SqlValue::Date(v) => Ok(v.and_time(NaiveTime::MIN)),
            other => Err(mismatch("NaiveDateTime", other)),
        }
    }
}

impl FromSql for DateTime<FixedOffset> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::DateTimeOffset(v) => Ok(*v),
            other => Err(mismatch("DateTime<FixedOffset>", other)),
        }
    }
}

/// Wall clock values are read as UTC; use [`crate::Row::instant`] to apply
/// a connection's policy instead.
impl FromSql for DateTime<Utc> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value
            .as_instant(DateTimePolicy::Utc)?
            .ok_or_else(|| mismatch("DateTime<Utc>", value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sql_i32() {
        assert_eq!(i32::from_sql(&SqlValue::Int(42)).unwrap(), 42);
        assert_eq!(i32::from_sql(&SqlValue::TinyInt(7)).unwrap(), 7);
        assert!(matches!(
            i32::from_sql(&SqlValue::BigInt(i64::MAX)),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_from_sql_string() {
        assert_eq!(String::from_sql(&SqlValue::from("hello")).unwrap(), "hello");
        assert!(matches!(
            String::from_sql(&SqlValue::Int(1)),
            Err(TypeError::TypeMismatch { expected: "String", actual: "int" })
        ));
    }

    #[test]
    fn test_from_sql_null() {
        assert_eq!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull));
    }

    #[test]
    fn test_from_sql_option() {
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Int(1)).unwrap(), Some(1));
    }
}
