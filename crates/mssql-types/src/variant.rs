//! `sql_variant` values, decoded through the codec of their base type.
//!
//! Layout: base type byte, property byte count, type properties, data.

use bytes::{Buf, Bytes};
use tds_protocol::{Collation, TypeId, TypeInfo};

use crate::data_type::{DataType, ValueMeta, data_type};
use crate::error::TypeError;
use crate::value::SqlValue;

/// `sql_variant` codec. Values can be read but not sent.
#[derive(Debug)]
pub struct VariantType;

fn invalid(msg: impl Into<String>) -> TypeError {
    TypeError::InvalidBinary(format!("sql_variant: {}", msg.into()))
}

/// Build the base type's `TYPE_INFO` from the variant's properties.
fn base_type_info(type_id: TypeId, mut props: &[u8]) -> Result<TypeInfo, TypeError> {
    let need = |n: usize, props: &[u8]| {
        if props.len() < n {
            Err(invalid(format!("{} property bytes for {type_id:?}", props.len())))
        } else {
            Ok(())
        }
    };
    let info = TypeInfo::new(type_id);
    Ok(match type_id {
        TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
            need(1, props)?;
            info.with_scale(props[0])
        }
        TypeId::DecimalN | TypeId::NumericN | TypeId::Decimal | TypeId::Numeric => {
            need(2, props)?;
            info.with_precision(props[0], props[1])
        }
        TypeId::BigVarBinary | TypeId::BigBinary => {
            need(2, props)?;
            info.with_length(u32::from(props.get_u16_le()))
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
            need(7, props)?;
            let collation = Collation::from_bytes(&props[..5])?;
            props.advance(5);
            info.with_length(u32::from(props.get_u16_le())).with_collation(collation)
        }
        _ if type_id.fixed_size().is_some() || matches!(type_id, TypeId::Date | TypeId::Guid) => info,
        other => return Err(invalid(format!("unsupported base type {other:?}"))),
    })
}

impl DataType for VariantType {
    fn id(&self) -> TypeId {
        TypeId::Variant
    }

    fn name(&self) -> &'static str {
        "sql_variant"
    }

    fn declaration(&self, _info: &TypeInfo) -> String {
        "sql_variant".to_owned()
    }

    fn validate(&self, value: SqlValue, _meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        match value {
            SqlValue::Null => Ok(value),
            _ => Err(TypeError::Unsupported("sql_variant parameters".to_owned())),
        }
    }

    fn encode_data(&self, _value: &SqlValue, _meta: &ValueMeta<'_>) -> Result<Bytes, TypeError> {
        Err(TypeError::Unsupported("sql_variant parameters".to_owned()))
    }

    fn decode(&self, raw: Option<Bytes>, meta: &ValueMeta<'_>) -> Result<SqlValue, TypeError> {
        let Some(mut raw) = raw else {
            return Ok(SqlValue::Null);
        };
        if raw.len() < 2 {
            return Err(invalid("truncated header"));
        }
        let type_id = TypeId::from_u8(raw.get_u8())?;
        let prop_len = usize::from(raw.get_u8());
        if raw.len() < prop_len {
            return Err(invalid("truncated properties"));
        }
        let props = raw.split_to(prop_len);
        let info = base_type_info(type_id, &props)?;
        let inner = ValueMeta {
            type_info: &info,
            ..*meta
        };
        data_type(type_id).decode(Some(raw), &inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn decode(raw: BytesMut) -> SqlValue {
        let info = TypeInfo::new(TypeId::Variant).with_length(8009);
        VariantType.decode(Some(raw.freeze()), &ValueMeta::new(&info)).unwrap()
    }

    #[test]
    fn int_variant() {
        let mut raw = BytesMut::new();
        raw.put_u8(TypeId::Int4 as u8);
        raw.put_u8(0);
        raw.put_i32_le(-7);
        assert_eq!(decode(raw), SqlValue::Int(-7));
    }

    #[test]
    fn nvarchar_variant_carries_collation_and_length() {
        let mut raw = BytesMut::new();
        raw.put_u8(TypeId::NVarChar as u8);
        raw.put_u8(7);
        raw.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        raw.put_u16_le(20);
        raw.put_slice(&[b'h', 0, b'i', 0]);
        assert_eq!(decode(raw), SqlValue::from("hi"));
    }

    #[test]
    fn decimal_variant() {
        let mut raw = BytesMut::new();
        raw.put_u8(TypeId::NumericN as u8);
        raw.put_u8(2);
        raw.put_u8(5);
        raw.put_u8(2);
        raw.put_u8(1);
        raw.put_u32_le(12345);
        assert_eq!(
            decode(raw),
            SqlValue::Decimal(rust_decimal::Decimal::new(12345, 2))
        );
    }

    #[test]
    fn parameters_are_rejected() {
        let info = TypeInfo::new(TypeId::Variant);
        assert!(VariantType
            .validate(SqlValue::Int(1), &ValueMeta::new(&info))
            .is_err());
    }
}
