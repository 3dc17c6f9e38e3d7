//! `uniqueidentifier`.
//!
//! The wire form is mixed-endian: the first three groups are stored
//! little-endian and the last eight bytes as-is.

use bytes::Bytes;
use tds_protocol::{TypeId, TypeInfo};
use uuid::Uuid;

use crate::data_type::{DataType, ValueMeta, mismatch};
use crate::error::TypeError;
use crate::value::SqlValue;

/// Reorder between RFC 4122 byte order and the wire order. The swap is its
/// own inverse.
fn swap_groups(bytes: [u8; 16]) -> [u8; 16] {
    let mut out = bytes;
    out[0..4].reverse();
    out[4..6].reverse();
    out[6..8].reverse();
    out
}

/// `uniqueidentifier` codec.
#[derive(Debug)]
pub struct GuidType;

impl GuidType {
    fn coerce(value: &SqlValue) -> Result<Uuid, TypeError> {
        match value {
            SqlValue::Uuid(u) => Ok(*u),
            SqlValue::String(s) => Uuid::parse_str(s).map_err(|e| TypeError::InvalidBinary(e.to_string())),
            SqlValue::Binary(b) => Uuid::from_slice(b).map_err(|e| TypeError::InvalidBinary(e.to_string())),
            other => Err(mismatch("uniqueidentifier", other)),
        }
    }
}

impl DataType for GuidType {
    fn id(&self) -> TypeId {
        TypeId::Guid
    }

    fn name(&self) -> &'static str {
        "uniqueidentifier"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "uniqueidentifier".to_owned()
    }

    fn validate(&self, value: SqlValue, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        Self::coerce(&value).map(SqlValue::Uuid)
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        let uuid = Self::coerce(value)?;
        Ok(Bytes::copy_from_slice(&swap_groups(*uuid.as_bytes())))
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        let bytes: [u8; 16] = raw[..]
            .try_into()
            .map_err(|_| TypeError::InvalidBinary(format!("uniqueidentifier of {} bytes", raw.len())))?;
        Ok(SqlValue::Uuid(Uuid::from_bytes(swap_groups(bytes))))
    }
}
