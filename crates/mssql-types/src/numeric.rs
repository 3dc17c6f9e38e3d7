//! Integer, bit, float, money and decimal codecs.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rust_decimal::{Decimal, RoundingStrategy};
use tds_protocol::{TypeId, TypeInfo};

use crate::data_type::{DataType, ValueMeta, mismatch};
use crate::error::TypeError;
use crate::value::SqlValue;

fn bad_width(type_name: &str, width: usize) -> TypeError {
    TypeError::InvalidBinary(format!("{type_name} of {width} bytes"))
}

/// The `NULL` type of untyped result columns such as `SELECT NULL`.
#[derive(Debug)]
pub struct NullType;

impl DataType for NullType {
    fn id(&self) -> TypeId {
        TypeId::Null
    }

    fn name(&self) -> &'static str {
        "null"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "sql_variant".to_owned()
    }

    fn validate(&self, value: SqlValue, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            other => Err(mismatch("null", &other)),
        }
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Err(mismatch("null", value))
    }

    fn decode(&self, _raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Null)
    }
}

/// `tinyint`, `smallint`, `int` and `bigint`, fixed or nullable.
#[derive(Debug)]
pub struct IntType;

impl IntType {
    fn coerce(value: &SqlValue, width: usize) -> Result<SqlValue, TypeError> {
        let n = match value {
            SqlValue::Decimal(d) if d.fract().is_zero() => i64::try_from(*d).ok(),
            SqlValue::Double(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
            other => other.as_i64(),
        }
        .ok_or_else(|| mismatch("int", value))?;

        let out_of_range = |target_type: &'static str| TypeError::OutOfRange {
            target_type,
            value: n.to_string(),
        };
        Ok(match width {
            1 => SqlValue::TinyInt(u8::try_from(n).map_err(|_| out_of_range("tinyint"))?),
            2 => SqlValue::SmallInt(i16::try_from(n).map_err(|_| out_of_range("smallint"))?),
            4 => SqlValue::Int(i32::try_from(n).map_err(|_| out_of_range("int"))?),
            8 => SqlValue::BigInt(n),
            other => return Err(bad_width("int", other)),
        })
    }
}

impl DataType for IntType {
    fn id(&self) -> TypeId {
        TypeId::IntN
    }

    fn name(&self) -> &'static str {
        "int"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        match ValueMeta::new(info).width() {
            1 => "tinyint",
            2 => "smallint",
            8 => "bigint",
            _ => "int",
        }
        .to_owned()
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        Self::coerce(&value, meta.width())
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let mut buf = BytesMut::with_capacity(8);
        match Self::coerce(value, meta.width())? {
            SqlValue::TinyInt(v) => buf.put_u8(v),
            SqlValue::SmallInt(v) => buf.put_i16_le(v),
            SqlValue::Int(v) => buf.put_i32_le(v),
            SqlValue::BigInt(v) => buf.put_i64_le(v),
            other => return Err(mismatch("int", &other)),
        }
        Ok(buf.freeze())
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(mut raw) = raw else {
            return Ok(SqlValue::Null);
        };
        Ok(match raw.len() {
            1 => SqlValue::TinyInt(raw.get_u8()),
            2 => SqlValue::SmallInt(raw.get_i16_le()),
            4 => SqlValue::Int(raw.get_i32_le()),
            8 => SqlValue::BigInt(raw.get_i64_le()),
            other => return Err(bad_width("int", other)),
        })
    }
}

/// `bit`.
#[derive(Debug)]
pub struct BitType;

impl BitType {
    fn coerce(value: &SqlValue) -> Result<bool, TypeError> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            other => other.as_i64().map(|n| n != 0).ok_or_else(|| mismatch("bit", other)),
        }
    }
}

impl DataType for BitType {
    fn id(&self) -> TypeId {
        TypeId::BitN
    }

    fn name(&self) -> &'static str {
        "bit"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "bit".to_owned()
    }

    fn validate(&self, value: SqlValue, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        Self::coerce(&value).map(SqlValue::Bool)
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Ok(Bytes::copy_from_slice(&[u8::from(Self::coerce(value)?)]))
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        Ok(match raw.as_deref() {
            None => SqlValue::Null,
            Some([b]) => SqlValue::Bool(*b != 0),
            Some(other) => return Err(bad_width("bit", other.len())),
        })
    }
}

/// `real` and `float`.
#[derive(Debug)]
pub struct FloatType;

impl FloatType {
    fn coerce(value: &SqlValue, width: usize) -> Result<SqlValue, TypeError> {
        let f = match value {
            SqlValue::Decimal(d) => f64::try_from(*d).ok(),
            other => other.as_f64().or_else(|| other.as_i64().map(|n| n as f64)),
        }
        .ok_or_else(|| mismatch("float", value))?;
        if !f.is_finite() {
            return Err(TypeError::OutOfRange {
                target_type: "float",
                value: f.to_string(),
            });
        }
        match width {
            4 => {
                let narrowed = f as f32;
                if !narrowed.is_finite() {
                    return Err(TypeError::OutOfRange {
                        target_type: "real",
                        value: f.to_string(),
                    });
                }
                Ok(SqlValue::Float(narrowed))
            }
            8 => Ok(SqlValue::Double(f)),
            other => Err(bad_width("float", other)),
        }
    }
}

impl DataType for FloatType {
    fn id(&self) -> TypeId {
        TypeId::FloatN
    }

    fn name(&self) -> &'static str {
        "float"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        if ValueMeta::new(info).width() == 4 { "real" } else { "float" }.to_owned()
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        Self::coerce(&value, meta.width())
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Ok(match Self::coerce(value, meta.width())? {
            SqlValue::Float(f) => Bytes::copy_from_slice(&f.to_le_bytes()),
            SqlValue::Double(f) => Bytes::copy_from_slice(&f.to_le_bytes()),
            other => return Err(mismatch("float", &other)),
        })
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(mut raw) = raw else {
            return Ok(SqlValue::Null);
        };
        Ok(match raw.len() {
            4 => SqlValue::Float(raw.get_f32_le()),
            8 => SqlValue::Double(raw.get_f64_le()),
            other => return Err(bad_width("float", other)),
        })
    }
}

fn to_decimal(value: &SqlValue, expected: &'static str) -> Result<Decimal, TypeError> {
    match value {
        SqlValue::Double(f) => Decimal::try_from(*f).map_err(|e| TypeError::InvalidDecimal(e.to_string())),
        SqlValue::Float(f) => Decimal::try_from(*f).map_err(|e| TypeError::InvalidDecimal(e.to_string())),
        other => other.as_decimal().ok_or_else(|| mismatch(expected, other)),
    }
}

/// `money` and `smallmoney`: a signed count of 1/10000 units.
#[derive(Debug)]
pub struct MoneyType;

impl MoneyType {
    fn units(value: &SqlValue, width: usize) -> Result<i64, TypeError> {
        let mut d = to_decimal(value, "money")?.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
        d.rescale(4);
        let units = d.mantissa();
        let fits = match width {
            4 => i32::try_from(units).is_ok(),
            8 => i64::try_from(units).is_ok(),
            other => return Err(bad_width("money", other)),
        };
        if !fits {
            return Err(TypeError::OutOfRange {
                target_type: if width == 4 { "smallmoney" } else { "money" },
                value: d.to_string(),
            });
        }
        Ok(units as i64)
    }
}

impl DataType for MoneyType {
    fn id(&self) -> TypeId {
        TypeId::MoneyN
    }

    fn name(&self) -> &'static str {
        "money"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        if ValueMeta::new(info).width() == 4 { "smallmoney" } else { "money" }.to_owned()
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        Self::units(&value, meta.width()).map(|units| SqlValue::Decimal(Decimal::new(units, 4)))
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let units = Self::units(value, meta.width())?;
        let mut buf = BytesMut::with_capacity(8);
        if meta.width() == 4 {
            buf.put_i32_le(units as i32);
        } else {
            buf.put_i32_le((units >> 32) as i32);
            buf.put_u32_le(units as u32);
        }
        Ok(buf.freeze())
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(mut raw) = raw else {
            return Ok(SqlValue::Null);
        };
        let units = match raw.len() {
            4 => i64::from(raw.get_i32_le()),
            8 => {
                let high = i64::from(raw.get_i32_le());
                let low = i64::from(raw.get_u32_le());
                (high << 32) | low
            }
            other => return Err(bad_width("money", other)),
        };
        Ok(SqlValue::Decimal(Decimal::new(units, 4)))
    }
}

/// `decimal(p, s)` and `numeric(p, s)`.
#[derive(Debug)]
pub struct DecimalType;

/// Scale `rust_decimal` can carry.
const MAX_DECIMAL_SCALE: u8 = 28;

/// Largest precision and scale of `decimal`.
const MAX_NUMERIC_PRECISION: u8 = 38;

/// A `decimal`/`numeric` value kept exactly as the server sent it.
///
/// Rows decode into [`Decimal`] whenever it holds the value losslessly. Values
/// with more than 96 bits of mantissa or a scale above 28 that cannot be
/// trimmed decode into this instead. It can be sent back as a parameter and
/// formats as its exact decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    mantissa: i128,
    scale: u8,
}

impl Numeric {
    /// `mantissa * 10^-scale`.
    ///
    /// # Errors
    ///
    /// Fails if the scale exceeds 38 or the mantissa has more than 38 digits.
    pub fn new(mantissa: i128, scale: u8) -> Result<Self, TypeError> {
        let value = Self { mantissa, scale };
        if scale > MAX_NUMERIC_PRECISION || mantissa.unsigned_abs() >= pow10(MAX_NUMERIC_PRECISION) {
            return Err(TypeError::InvalidDecimal(value.to_string()));
        }
        Ok(value)
    }

    /// Unscaled digits, signed.
    #[must_use]
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Digits after the decimal point.
    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// The same value as a [`Decimal`], if it fits without loss.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        let (mut mantissa, mut scale) = (self.mantissa, self.scale);
        loop {
            if scale <= MAX_DECIMAL_SCALE {
                if let Ok(d) = Decimal::try_from_i128_with_scale(mantissa, u32::from(scale)) {
                    return Some(d);
                }
            }
            if scale == 0 || mantissa % 10 != 0 {
                return None;
            }
            mantissa /= 10;
            scale -= 1;
        }
    }
}

impl From<Decimal> for Numeric {
    fn from(d: Decimal) -> Self {
        Self {
            mantissa: d.mantissa(),
            // rust_decimal scales stop at 28.
            scale: d.scale() as u8,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let scale = usize::from(self.scale);
        if scale == 0 {
            return f.write_str(&digits);
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (integer, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{integer}.{fraction}")
    }
}

fn pow10(exponent: u8) -> u128 {
    10u128.pow(u32::from(exponent.min(MAX_NUMERIC_PRECISION)))
}

impl DecimalType {
    fn precision(info: &TypeInfo) -> u8 {
        if info.precision == 0 { 38 } else { info.precision }
    }

    /// Round to the declared scale and check the declared precision.
    fn coerce(value: &SqlValue, info: &TypeInfo) -> Result<Decimal, TypeError> {
        let precision = Self::precision(info);
        let scale = info.scale.min(MAX_DECIMAL_SCALE);
        let rounded =
            to_decimal(value, "decimal")?.round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero);

        let integer_digits = match rounded.abs().trunc() {
            t if t.is_zero() => 0,
            t => t.to_string().len(),
        };
        if integer_digits + usize::from(info.scale) > usize::from(precision) {
            return Err(TypeError::PrecisionExceeded {
                precision,
                value: rounded.to_string(),
            });
        }
        Ok(rounded)
    }

    /// Bring a wide value to the declared scale, rounding half away from
    /// zero, and check the declared precision.
    fn rescale(value: Numeric, info: &TypeInfo) -> Result<Numeric, TypeError> {
        let precision = Self::precision(info);
        let target = info.scale.min(MAX_NUMERIC_PRECISION);
        let magnitude = value.mantissa.unsigned_abs();
        let scaled = if target >= value.scale {
            magnitude.checked_mul(pow10(target - value.scale))
        } else {
            let factor = pow10(value.scale - target);
            let (quotient, remainder) = (magnitude / factor, magnitude % factor);
            Some(if remainder * 2 >= factor { quotient + 1 } else { quotient })
        };
        let magnitude = scaled
            .filter(|m| *m < pow10(precision))
            .ok_or_else(|| TypeError::PrecisionExceeded {
                precision,
                value: value.to_string(),
            })?;
        // Below 10^38, so it fits.
        let mantissa = magnitude as i128;
        Ok(Numeric {
            mantissa: if value.mantissa < 0 { -mantissa } else { mantissa },
            scale: target,
        })
    }

    fn wire(positive: bool, magnitude: u128, precision: u8) -> Bytes {
        let len = Self::mantissa_len(precision);
        let mut buf = BytesMut::with_capacity(1 + len);
        buf.put_u8(u8::from(positive));
        buf.put_slice(&magnitude.to_le_bytes()[..len]);
        buf.freeze()
    }

    fn mantissa_len(precision: u8) -> usize {
        match precision {
            0..=9 => 4,
            10..=19 => 8,
            20..=28 => 12,
            _ => 16,
        }
    }
}

impl DataType for DecimalType {
    fn id(&self) -> TypeId {
        TypeId::DecimalN
    }

    fn name(&self) -> &'static str {
        "decimal"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        let name = match info.type_id {
            TypeId::Numeric | TypeId::NumericN => "numeric",
            _ => "decimal",
        };
        format!("{name}({}, {})", Self::precision(info), info.scale)
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        match value {
            SqlValue::Null => Ok(value),
            SqlValue::Numeric(n) => Self::rescale(n, meta.type_info).map(SqlValue::Numeric),
            other => Self::coerce(&other, meta.type_info).map(SqlValue::Decimal),
        }
    }

    fn encode_data(&self, value: &SqlValue, meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let info = meta.type_info;
        if let SqlValue::Numeric(n) = value {
            let n = Self::rescale(*n, info)?;
            return Ok(Self::wire(n.mantissa >= 0, n.mantissa.unsigned_abs(), Self::precision(info)));
        }
        let mut d = Self::coerce(value, info)?;
        d.rescale(u32::from(info.scale.min(MAX_DECIMAL_SCALE)));
        let mut magnitude = d.mantissa().unsigned_abs();
        if info.scale > MAX_DECIMAL_SCALE {
            magnitude = 10u128
                .checked_pow(u32::from(info.scale - MAX_DECIMAL_SCALE))
                .and_then(|factor| magnitude.checked_mul(factor))
                .ok_or_else(|| TypeError::InvalidDecimal(d.to_string()))?;
        }

        Ok(Self::wire(
            !d.is_sign_negative() || d.is_zero(),
            magnitude,
            Self::precision(info),
        ))
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        let Some((&sign, digits)) = raw.split_first() else {
            return Err(bad_width("decimal", 0));
        };
        if digits.len() > 16 {
            return Err(bad_width("decimal", raw.len()));
        }
        let mut bytes = [0u8; 16];
        bytes[..digits.len()].copy_from_slice(digits);
        let magnitude = i128::try_from(u128::from_le_bytes(bytes))
            .map_err(|e| TypeError::InvalidDecimal(e.to_string()))?;
        let value = Numeric::new(
            if sign == 0 { -magnitude } else { magnitude },
            meta.type_info.scale,
        )?;
        Ok(value.to_decimal().map_or(SqlValue::Numeric(value), SqlValue::Decimal))
    }
}
