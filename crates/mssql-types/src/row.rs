//! Decoded result rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tds_protocol::{ColMetaData, ColumnData, RawRow};

use crate::data_type::{ValueMeta, decode_value};
use crate::datetime::DateTimePolicy;
use crate::error::TypeError;
use crate::from_sql::FromSql;
use crate::value::SqlValue;

/// Column lookup by position or name.
pub trait ColumnIndex {
    /// Position of the column in `columns`, if present.
    fn index(&self, columns: &[ColumnData]) -> Option<usize>;

    /// Description for lookup errors.
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn index(&self, columns: &[ColumnData]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{self}")
    }
}

/// Names match case-insensitively, first match wins.
impl ColumnIndex for &str {
    fn index(&self, columns: &[ColumnData]) -> Option<usize> {
        columns.iter().position(|c| c.name.eq_ignore_ascii_case(self))
    }

    fn describe(&self) -> String {
        (*self).to_owned()
    }
}

/// One row of a result set. Rows of the same result share its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColMetaData>,
    values: Vec<SqlValue>,
    policy: DateTimePolicy,
}

impl Row {
    /// Decode every value of `raw` against `columns`.
    pub fn decode(raw: RawRow, columns: &Arc<ColMetaData>, policy: DateTimePolicy) -> Result<Self, TypeError> {
        let values = raw
            .values
            .into_iter()
            .zip(&columns.columns)
            .map(|(value, column)| decode_value(value, &ValueMeta::new(&column.type_info).with_policy(policy)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            columns: Arc::clone(columns),
            values,
            policy,
        })
    }

    /// Row from already decoded values.
    #[must_use]
    pub fn new(columns: Arc<ColMetaData>, values: Vec<SqlValue>) -> Self {
        Self {
            columns,
            values,
            policy: DateTimePolicy::Utc,
        }
    }

    /// Result set metadata.
    #[must_use]
    pub fn columns(&self) -> &[ColumnData] {
        &self.columns.columns
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column.
    #[must_use]
    pub fn value(&self, idx: impl ColumnIndex) -> Option<&SqlValue> {
        idx.index(self.columns()).and_then(|i| self.values.get(i))
    }

    /// Typed value of a column.
    pub fn get<T: FromSql>(&self, idx: impl ColumnIndex) -> Result<T, TypeError> {
        let i = idx
            .index(self.columns())
            .ok_or_else(|| TypeError::ColumnNotFound(idx.describe()))?;
        T::from_sql(&self.values[i])
    }

    /// A date/time column as an instant, read through the connection's
    /// policy. NULL is `None`.
    pub fn instant(&self, idx: impl ColumnIndex) -> Result<Option<DateTime<Utc>>, TypeError> {
        let missing = || TypeError::ColumnNotFound(idx.describe());
        match idx.index(self.columns()).and_then(|i| self.values.get(i)) {
            None => Err(missing()),
            Some(SqlValue::Null) => Ok(None),
            Some(value) => value
                .as_instant(self.policy)?
                .map(Some)
                .ok_or(TypeError::TypeMismatch {
                    expected: "datetime",
                    actual: value.type_name(),
                }),
        }
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Take the values out of the row.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tds_protocol::{TypeId, TypeInfo};

    fn metadata() -> Arc<ColMetaData> {
        Arc::new(ColMetaData {
            columns: vec![
                ColumnData::new("Id", TypeInfo::new(TypeId::IntN).with_length(4)),
                ColumnData::new("Name", TypeInfo::new(TypeId::NVarChar).with_length(20)),
            ],
        })
    }

    #[test]
    fn decode_and_lookup() {
        let raw = RawRow {
            values: vec![
                Some(Bytes::copy_from_slice(&5i32.to_le_bytes())),
                None,
            ],
        };
        let row = Row::decode(raw, &metadata(), DateTimePolicy::Utc).unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 5);
        assert_eq!(row.get::<i32>("id").unwrap(), 5);
        assert_eq!(row.get::<Option<String>>("Name").unwrap(), None);
        assert_eq!(row.value("Name"), Some(&SqlValue::Null));
        assert!(row.get::<i32>(2).is_err());
        assert!(matches!(
            row.get::<i32>("missing"),
            Err(TypeError::ColumnNotFound(name)) if name == "missing"
        ));
    }
}
