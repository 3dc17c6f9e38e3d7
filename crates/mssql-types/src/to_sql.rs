//! Trait for converting Rust types to SQL values.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tds_protocol::TypeInfo;
use uuid::Uuid;

use crate::data_type::infer_type_info;
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Trait for types that can be converted to SQL values.
///
/// This trait is implemented for common Rust types to enable
/// type-safe parameter binding in queries.
pub trait ToSql {
    /// Convert this value to a SQL value.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;

    /// Wire type used when the caller does not declare one.
    fn type_info(&self) -> Result<TypeInfo, TypeError> {
        self.to_sql().map(|value| infer_type_info(&value))
    }
}

macro_rules! impl_to_sql {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> Result<SqlValue, TypeError> {
                    Ok(SqlValue::from(self.clone()))
                }
            }
        )*
    };
}

impl_to_sql! {
    bool, u8, i16, i32, i64, f32, f64, String, Bytes, Vec<u8>, Decimal, Numeric, Uuid,
    NaiveDate, NaiveTime, NaiveDateTime, DateTime<FixedOffset>, DateTime<Utc>,
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }
}

impl ToSql for str {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::from(self))
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::from(self))
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        (**self).to_sql()
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_ref().map_or(Ok(SqlValue::Null), ToSql::to_sql)
    }
}
