//! `date`, `time`, `datetime2`, `datetimeoffset`, `datetime` and
//! `smalldatetime` codecs over the layouts in [`crate::datetime`].

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tds_protocol::{TypeId, TypeInfo};

use crate::data_type::{DataType, ValueMeta, mismatch};
use crate::datetime::{
    check_datetime_range, check_smalldatetime_range, read_date, read_datetime, read_datetime2,
    read_datetimeoffset, read_smalldatetime, read_time, time_len, write_date, write_datetime,
    write_datetime2, write_datetimeoffset, write_smalldatetime, write_time,
};
use crate::error::TypeError;
use crate::value::SqlValue;

/// Wall clock value for `value`, mapping instants through the policy.
fn wall_clock(value: &SqlValue, meta: &ValueMeta<'_>, expected: &'static str) -> Result<NaiveDateTime, TypeError> {
    let wall = match value {
        SqlValue::DateTime(v) => *v,
        SqlValue::Date(v) => v.and_time(NaiveTime::MIN),
        SqlValue::Timestamp(v) => meta.policy.wall_clock(*v),
        SqlValue::DateTimeOffset(v) => meta.policy.wall_clock(v.with_timezone(&Utc)),
        SqlValue::String(s) => s
            .parse::<NaiveDateTime>()
            .map_err(|e| TypeError::InvalidDateTime(format!("{s}: {e}")))?,
        other => return Err(mismatch(expected, other)),
    };
    if wall.year() > 9999 {
        return Err(TypeError::OutOfRange {
            target_type: expected,
            value: wall.to_string(),
        });
    }
    Ok(wall)
}

fn buffer(len: usize, write: impl FnOnce(&mut BytesMut) -> Result<(), TypeError>) -> Result<Bytes, TypeError> {
    let mut buf = BytesMut::with_capacity(len);
    write(&mut buf)?;
    Ok(buf.freeze())
}

/// `date`.
#[derive(Debug)]
pub struct DateType;

impl DateType {
    fn coerce(value: &SqlValue, meta: &ValueMeta<'_>) -> Result<NaiveDate, TypeError> {
        match value {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::String(s) => match s.parse::<NaiveDate>() {
                Ok(d) => Ok(d),
                Err(_) => wall_clock(value, meta, "date").map(|w| w.date()),
            },
            other => wall_clock(other, meta, "date").map(|w| w.date()),
        }
    }
}

impl DataType for DateType {
    fn id(&self) -> TypeId {
        TypeId::Date
    }

    fn name(&self) -> &'static str {
        "date"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "date".to_owned()
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let date = Self::coerce(&value, meta)?;
        buffer(3, |buf| write_date(buf, date))?;
        Ok(SqlValue::Date(date))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let date = Self::coerce(value, meta)?;
        buffer(3, |buf| write_date(buf, date))
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        raw.map_or(Ok(SqlValue::Null), |raw| read_date(&raw).map(SqlValue::Date))
    }
}

/// `time(n)`.
#[derive(Debug)]
pub struct TimeType;

impl TimeType {
    fn coerce(value: &SqlValue, meta: &ValueMeta<'_>) -> Result<NaiveTime, TypeError> {
        match value {
            SqlValue::Time(t) => Ok(*t),
            SqlValue::String(s) => s
                .parse::<NaiveTime>()
                .map_err(|e| TypeError::InvalidDateTime(format!("{s}: {e}"))),
            other => wall_clock(other, meta, "time").map(|w| w.time()),
        }
    }
}

impl DataType for TimeType {
    fn id(&self) -> TypeId {
        TypeId::Time
    }

    fn name(&self) -> &'static str {
        "time"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        format!("time({})", info.scale)
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let time = Self::coerce(&value, meta)?;
        self.encode_data(&SqlValue::Time(time), meta)?;
        Ok(SqlValue::Time(time))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let time = Self::coerce(value, meta)?;
        let scale = meta.type_info.scale;
        buffer(time_len(scale), |buf| write_time(buf, time, scale))
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        raw.map_or(Ok(SqlValue::Null), |raw| {
            read_time(&raw, meta.type_info.scale).map(SqlValue::Time)
        })
    }
}

/// `datetime2(n)`.
#[derive(Debug)]
pub struct DateTime2Type;

impl DataType for DateTime2Type {
    fn id(&self) -> TypeId {
        TypeId::DateTime2
    }

    fn name(&self) -> &'static str {
        "datetime2"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        format!("datetime2({})", info.scale)
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let wall = wall_clock(&value, meta, "datetime2")?;
        self.encode_data(&SqlValue::DateTime(wall), meta)?;
        Ok(SqlValue::DateTime(wall))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let wall = wall_clock(value, meta, "datetime2")?;
        let scale = meta.type_info.scale;
        buffer(time_len(scale) + 3, |buf| write_datetime2(buf, wall, scale))
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        raw.map_or(Ok(SqlValue::Null), |raw| {
            read_datetime2(&raw, meta.type_info.scale).map(SqlValue::DateTime)
        })
    }
}

/// `datetimeoffset(n)`.
#[derive(Debug)]
pub struct DateTimeOffsetType;

impl DateTimeOffsetType {
    fn coerce(value: &SqlValue, meta: &ValueMeta<'_>) -> Result<DateTime<FixedOffset>, TypeError> {
        match value {
            SqlValue::DateTimeOffset(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.fixed_offset()),
            SqlValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| TypeError::InvalidDateTime(format!("{s}: {e}"))),
            other => {
                let wall = wall_clock(other, meta, "datetimeoffset")?;
                Ok(meta.policy.instant(wall)?.fixed_offset())
            }
        }
    }
}

impl DataType for DateTimeOffsetType {
    fn id(&self) -> TypeId {
        TypeId::DateTimeOffset
    }

    fn name(&self) -> &'static str {
        "datetimeoffset"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        format!("datetimeoffset({})", info.scale)
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let dto = Self::coerce(&value, meta)?;
        self.encode_data(&SqlValue::DateTimeOffset(dto), meta)?;
        Ok(SqlValue::DateTimeOffset(dto))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let dto = Self::coerce(value, meta)?;
        let scale = meta.type_info.scale;
        buffer(time_len(scale) + 5, |buf| write_datetimeoffset(buf, dto, scale))
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        raw.map_or(Ok(SqlValue::Null), |raw| {
            read_datetimeoffset(&raw, meta.type_info.scale).map(SqlValue::DateTimeOffset)
        })
    }
}

/// Legacy `datetime` (8 bytes) and `smalldatetime` (4 bytes).
#[derive(Debug)]
pub struct DateTimeType;

impl DataType for DateTimeType {
    fn id(&self) -> TypeId {
        TypeId::DateTimeN
    }

    fn name(&self) -> &'static str {
        "datetime"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        if ValueMeta::new(info).width() == 4 { "smalldatetime" } else { "datetime" }.to_owned()
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let wall = wall_clock(&value, meta, "datetime")?;
        if meta.width() == 4 {
            check_smalldatetime_range(wall)?;
        } else {
            check_datetime_range(wall)?;
        }
        Ok(SqlValue::DateTime(wall))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let wall = wall_clock(value, meta, "datetime")?;
        match meta.width() {
            4 => {
                check_smalldatetime_range(wall)?;
                buffer(4, |buf| write_smalldatetime(buf, wall))
            }
            _ => {
                check_datetime_range(wall)?;
                buffer(8, |buf| write_datetime(buf, wall))
            }
        }
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        match raw.len() {
            4 => read_smalldatetime(&raw).map(SqlValue::DateTime),
            _ => read_datetime(&raw).map(SqlValue::DateTime),
        }
    }
}
