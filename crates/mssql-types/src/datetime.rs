//! Date and time wire formats and the UTC/local policy.
//!
//! | type             | layout                                             |
//! |------------------|----------------------------------------------------|
//! | `date`           | 3-byte day count since 0001-01-01                  |
//! | `time(n)`        | 3 to 5 byte count of 10^-n seconds since midnight  |
//! | `datetime2(n)`   | `time(n)` then `date`                              |
//! | `datetimeoffset` | UTC `datetime2(n)` then i16 offset in minutes      |
//! | `datetime`       | i32 days since 1900-01-01, u32 1/300 s ticks       |
//! | `smalldatetime`  | u16 days since 1900-01-01, u16 minutes             |

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::TypeError;

/// `num_days_from_ce` of 1900-01-01.
const DAYS_TO_1900: i32 = 693_596;
const NANOS_PER_DAY: u64 = 86_400_000_000_000;
const TICKS_PER_DAY: u32 = 300 * 86_400;

/// How zone-aware instants map onto the server's zone-less wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateTimePolicy {
    /// The wall clock is UTC.
    #[default]
    Utc,
    /// The wall clock is the client's local time zone.
    Local,
}

impl DateTimePolicy {
    /// Wall clock time sent for `instant`.
    #[must_use]
    pub fn wall_clock(self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Utc => instant.naive_utc(),
            Self::Local => instant.with_timezone(&Local).naive_local(),
        }
    }

    /// Instant denoted by a wall clock value read from the server.
    pub fn instant(self, wall: NaiveDateTime) -> Result<DateTime<Utc>, TypeError> {
        match self {
            Self::Utc => Ok(Utc.from_utc_datetime(&wall)),
            Self::Local => Local
                .from_local_datetime(&wall)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| TypeError::InvalidDateTime(format!("{wall} does not exist in the local time zone"))),
        }
    }
}

/// Bytes used by the time part at `scale`.
#[must_use]
pub const fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3 | 4 => 4,
        _ => 5,
    }
}

fn scale_divisor(scale: u8) -> Result<u64, TypeError> {
    if scale > 7 {
        return Err(TypeError::InvalidDateTime(format!("scale {scale} exceeds 7")));
    }
    Ok(10u64.pow(9 - u32::from(scale)))
}

fn nanos_of_day(time: NaiveTime) -> u64 {
    u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond().min(999_999_999))
}

fn check_len(bytes: &[u8], expected: usize, type_name: &str) -> Result<(), TypeError> {
    if bytes.len() != expected {
        return Err(TypeError::InvalidBinary(format!(
            "{type_name} value of {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    Ok(())
}

fn read_uint_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn write_uint_le(dst: &mut BytesMut, value: u64, len: usize) {
    dst.put_slice(&value.to_le_bytes()[..len]);
}

/// Write a `date`.
pub fn write_date(dst: &mut BytesMut, date: NaiveDate) -> Result<(), TypeError> {
    let days = date.num_days_from_ce() - 1;
    if days < 0 {
        return Err(TypeError::InvalidDateTime(format!("{date} is before 0001-01-01")));
    }
    write_uint_le(dst, days as u64, 3);
    Ok(())
}

/// Read a `date`.
pub fn read_date(bytes: &[u8]) -> Result<NaiveDate, TypeError> {
    check_len(bytes, 3, "date")?;
    let days = read_uint_le(bytes) as i32;
    NaiveDate::from_num_days_from_ce_opt(days + 1)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))
}

/// Write the time part at `scale`, truncating below the scale's resolution.
pub fn write_time(dst: &mut BytesMut, time: NaiveTime, scale: u8) -> Result<(), TypeError> {
    let units = nanos_of_day(time) / scale_divisor(scale)?;
    write_uint_le(dst, units, time_len(scale));
    Ok(())
}

/// Read the time part at `scale`.
pub fn read_time(bytes: &[u8], scale: u8) -> Result<NaiveTime, TypeError> {
    check_len(bytes, time_len(scale), "time")?;
    let nanos = read_uint_le(bytes) * scale_divisor(scale)?;
    if nanos >= NANOS_PER_DAY {
        return Err(TypeError::InvalidDateTime(format!("{nanos} ns past midnight")));
    }
    NaiveTime::from_num_seconds_from_midnight_opt((nanos / 1_000_000_000) as u32, (nanos % 1_000_000_000) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{nanos} ns past midnight")))
}

/// Write a `datetime2`.
pub fn write_datetime2(dst: &mut BytesMut, value: NaiveDateTime, scale: u8) -> Result<(), TypeError> {
    write_time(dst, value.time(), scale)?;
    write_date(dst, value.date())
}

/// Read a `datetime2`.
pub fn read_datetime2(bytes: &[u8], scale: u8) -> Result<NaiveDateTime, TypeError> {
    check_len(bytes, time_len(scale) + 3, "datetime2")?;
    let (time, date) = bytes.split_at(time_len(scale));
    Ok(read_date(date)?.and_time(read_time(time, scale)?))
}

/// Write a `datetimeoffset`: the UTC wall clock, then the offset.
pub fn write_datetimeoffset(
    dst: &mut BytesMut,
    value: DateTime<FixedOffset>,
    scale: u8,
) -> Result<(), TypeError> {
    write_datetime2(dst, value.naive_utc(), scale)?;
    dst.put_i16_le((value.offset().local_minus_utc() / 60) as i16);
    Ok(())
}

/// Read a `datetimeoffset`.
pub fn read_datetimeoffset(bytes: &[u8], scale: u8) -> Result<DateTime<FixedOffset>, TypeError> {
    check_len(bytes, time_len(scale) + 5, "datetimeoffset")?;
    let (utc, mut offset) = bytes.split_at(time_len(scale) + 3);
    let utc = read_datetime2(utc, scale)?;
    let minutes = offset.get_i16_le();
    let offset = FixedOffset::east_opt(i32::from(minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("offset of {minutes} minutes")))?;
    Ok(offset.from_utc_datetime(&utc))
}

fn bound(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(h, mi, s))
}

fn check_range(
    value: NaiveDateTime,
    type_name: &'static str,
    min: Option<NaiveDateTime>,
    max: Option<NaiveDateTime>,
) -> Result<(), TypeError> {
    if min.is_some_and(|min| value < min) || max.is_some_and(|max| value >= max) {
        return Err(TypeError::OutOfRange {
            target_type: type_name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Check `value` fits `datetime` (1753-01-01 through 9999-12-31).
pub fn check_datetime_range(value: NaiveDateTime) -> Result<(), TypeError> {
    check_range(value, "datetime", bound(1753, 1, 1, 0, 0, 0), bound(10000, 1, 1, 0, 0, 0))
}

/// Check `value` fits `smalldatetime` (1900-01-01 through 2079-06-06 23:59).
pub fn check_smalldatetime_range(value: NaiveDateTime) -> Result<(), TypeError> {
    check_range(value, "smalldatetime", bound(1900, 1, 1, 0, 0, 0), bound(2079, 6, 6, 23, 59, 30))
}

/// Write a `datetime`, rounding to the nearest 1/300 second.
pub fn write_datetime(dst: &mut BytesMut, value: NaiveDateTime) -> Result<(), TypeError> {
    let mut days = value.date().num_days_from_ce() - DAYS_TO_1900;
    let nanos = nanos_of_day(value.time());
    let mut ticks = ((nanos * 3 + 5_000_000) / 10_000_000) as u32;
    if ticks >= TICKS_PER_DAY {
        days += 1;
        ticks = 0;
    }
    dst.put_i32_le(days);
    dst.put_u32_le(ticks);
    Ok(())
}

/// Read a `datetime`, rounding ticks to the nearest millisecond.
pub fn read_datetime(mut bytes: &[u8]) -> Result<NaiveDateTime, TypeError> {
    check_len(bytes, 8, "datetime")?;
    let days = bytes.get_i32_le();
    let ticks = bytes.get_u32_le();
    let date = NaiveDate::from_num_days_from_ce_opt(DAYS_TO_1900 + days)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))?;
    let millis = (u64::from(ticks) * 10 + 1) / 3;
    let time = NaiveTime::from_num_seconds_from_midnight_opt((millis / 1000) as u32, ((millis % 1000) * 1_000_000) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{ticks} ticks past midnight")))?;
    Ok(date.and_time(time))
}

/// Write a `smalldatetime`, rounding to the nearest minute.
pub fn write_smalldatetime(dst: &mut BytesMut, value: NaiveDateTime) -> Result<(), TypeError> {
    let mut days = value.date().num_days_from_ce() - DAYS_TO_1900;
    let seconds = value.time().num_seconds_from_midnight();
    let mut minutes = (seconds + 30) / 60;
    if minutes >= 1440 {
        days += 1;
        minutes = 0;
    }
    let days = u16::try_from(days).map_err(|_| TypeError::OutOfRange {
        target_type: "smalldatetime",
        value: value.to_string(),
    })?;
    dst.put_u16_le(days);
    dst.put_u16_le(minutes as u16);
    Ok(())
}

/// Read a `smalldatetime`.
pub fn read_smalldatetime(mut bytes: &[u8]) -> Result<NaiveDateTime, TypeError> {
    check_len(bytes, 4, "smalldatetime")?;
    let days = bytes.get_u16_le();
    let minutes = bytes.get_u16_le();
    let date = NaiveDate::from_num_days_from_ce_opt(DAYS_TO_1900 + i32::from(days))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{minutes} minutes past midnight")))?;
    Ok(date.and_time(time))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, s).unwrap()
    }

    #[test]
    fn date_epoch() {
        let mut buf = BytesMut::new();
        write_date(&mut buf, NaiveDate::from_ymd_opt(1, 1, 1).unwrap()).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0]);

        buf.clear();
        write_date(&mut buf, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()).unwrap();
        assert_eq!(read_uint_le(&buf), DAYS_TO_1900 as u64 - 1);
        assert_eq!(read_date(&buf).unwrap(), NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
    }

    #[test]
    fn time_lengths_follow_scale() {
        assert_eq!(time_len(0), 3);
        assert_eq!(time_len(3), 4);
        assert_eq!(time_len(7), 5);

        let time = NaiveTime::from_hms_nano_opt(13, 14, 15, 123_456_700).unwrap();
        let mut buf = BytesMut::new();
        write_time(&mut buf, time, 7).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(read_time(&buf, 7).unwrap(), time);

        buf.clear();
        write_time(&mut buf, time, 3).unwrap();
        assert_eq!(read_time(&buf, 3).unwrap(), NaiveTime::from_hms_milli_opt(13, 14, 15, 123).unwrap());
    }

    #[test]
    fn datetime_ticks() {
        let value = NaiveDate::from_ymd_opt(1900, 1, 2)
            .unwrap()
            .and_hms_milli_opt(0, 0, 1, 3)
            .unwrap();
        let mut buf = BytesMut::new();
        write_datetime(&mut buf, value).unwrap();
        assert_eq!(&buf[0..4], &1i32.to_le_bytes());
        assert_eq!(&buf[4..8], &301u32.to_le_bytes());
        assert_eq!(read_datetime(&buf).unwrap(), value);
    }

    #[test]
    fn datetime_rounds_into_next_day() {
        let value = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_000_000)
            .unwrap();
        let mut buf = BytesMut::new();
        write_datetime(&mut buf, value).unwrap();
        assert_eq!(read_datetime(&buf).unwrap(), ymd_hms(2000, 1, 2, 0, 0, 0));
    }

    #[test]
    fn smalldatetime_rounds_to_minute() {
        let mut buf = BytesMut::new();
        write_smalldatetime(&mut buf, ymd_hms(2020, 5, 5, 10, 20, 31)).unwrap();
        assert_eq!(read_smalldatetime(&buf).unwrap(), ymd_hms(2020, 5, 5, 10, 21, 0));
        assert!(check_smalldatetime_range(ymd_hms(2080, 1, 1, 0, 0, 0)).is_err());
        assert!(check_datetime_range(ymd_hms(1600, 1, 1, 0, 0, 0)).is_err());
        assert!(check_datetime_range(ymd_hms(1753, 1, 1, 0, 0, 0)).is_ok());
    }

    #[test]
    fn offset_is_stored_as_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let value = offset.from_local_datetime(&ymd_hms(2024, 3, 1, 12, 0, 0)).unwrap();
        let mut buf = BytesMut::new();
        write_datetimeoffset(&mut buf, value, 7).unwrap();
        assert_eq!(&buf[8..10], &120i16.to_le_bytes());
        assert_eq!(read_datetime2(&buf[..8], 7).unwrap(), ymd_hms(2024, 3, 1, 10, 0, 0));
        assert_eq!(read_datetimeoffset(&buf, 7).unwrap(), value);
    }

    #[test]
    fn utc_policy_is_identity() {
        let wall = ymd_hms(2024, 6, 1, 8, 0, 0);
        let instant = DateTimePolicy::Utc.instant(wall).unwrap();
        assert_eq!(DateTimePolicy::Utc.wall_clock(instant), wall);
    }
}
