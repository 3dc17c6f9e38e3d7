//! `binary`, `varbinary`, `image` and CLR UDT payloads.

use bytes::Bytes;
use tds_protocol::{TypeId, TypeInfo};

use crate::data_type::{DataType, ValueMeta, mismatch};
use crate::error::TypeError;
use crate::value::SqlValue;

/// Raw byte codec.
#[derive(Debug)]
pub struct BinaryType;

impl BinaryType {
    fn bytes(value: &SqlValue) -> Result<Bytes, TypeError> {
        match value {
            SqlValue::Binary(b) => Ok(b.clone()),
            other => Err(mismatch("varbinary", other)),
        }
    }
}

impl DataType for BinaryType {
    fn id(&self) -> TypeId {
        TypeId::BigVarBinary
    }

    fn name(&self) -> &'static str {
        "varbinary"
    }

    fn declaration(&self, info: &TypeInfo) -> String {
        match info.type_id {
            TypeId::Image => "image".to_owned(),
            TypeId::Udt => info.udt_type_name.clone().unwrap_or_else(|| "varbinary(max)".to_owned()),
            TypeId::Binary | TypeId::BigBinary => format!("binary({})", info.max_length.max(1)),
            _ if info.is_max() => "varbinary(max)".to_owned(),
            _ => format!("varbinary({})", info.max_length.max(1)),
        }
    }

    fn validate(&self, value: SqlValue, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let len = Self::bytes(&value)?.len();
        let info = meta.type_info;
        let bounded = !(info.is_max() || info.type_id.is_legacy_lob() || info.type_id == TypeId::Udt);
        if bounded && len > info.max_length as usize {
            return Err(TypeError::TooLong {
                type_name: "varbinary",
                length: len,
                max: info.max_length as usize,
            });
        }
        Ok(value)
    }

    fn encode_data(&self, value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Self::bytes(value)
    }

    fn decode(&self, raw: Option<Bytes>, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        Ok(raw.map_or(SqlValue::Null, SqlValue::Binary))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn length_limit() {
        let info = TypeInfo::new(TypeId::BigVarBinary).with_length(4);
        let meta = ValueMeta::new(&info);
        assert!(BinaryType.validate(SqlValue::from(vec![1u8; 4]), &meta).is_ok());
        assert!(matches!(
            BinaryType.validate(SqlValue::from(vec![1u8; 5]), &meta),
            Err(TypeError::TooLong { length: 5, max: 4, .. })
        ));
        assert!(BinaryType.validate(SqlValue::from("text"), &meta).is_err());
    }

    #[test]
    fn declarations() {
        assert_eq!(
            BinaryType.declaration(&TypeInfo::new(TypeId::BigBinary).with_length(16)),
            "binary(16)"
        );
        assert_eq!(BinaryType.declaration(&TypeInfo::new(TypeId::Image)), "image");
    }
}
