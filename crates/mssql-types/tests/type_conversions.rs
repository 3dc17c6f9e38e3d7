//! Value codec edge cases: NULL handling, decimal precision, money range,
//! string limits, legacy LOBs and PLP values.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::{
    FromSql, Numeric, SqlValue, ToSql, TypeError, ValueMeta, data_type, decode_value, encode_param,
    infer_type_info,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tds_protocol::{MAX_LENGTH_PLP, TypeId, TypeInfo};

/// Concatenate encoded chunks into the on-wire value.
fn wire(chunks: Vec<Bytes>) -> Bytes {
    let mut out = BytesMut::new();
    for chunk in chunks {
        out.put_slice(&chunk);
    }
    out.freeze()
}

/// Encode `value` as `info`, then read it back the way a row is read.
fn through_wire(value: SqlValue, info: &TypeInfo) -> SqlValue {
    let meta = ValueMeta::new(info).in_row();
    let mut buf = wire(encode_param(value, &meta).unwrap());
    let raw = info.read_value(&mut buf).unwrap();
    assert!(buf.is_empty(), "value not fully consumed");
    decode_value(raw, &meta).unwrap()
}

// ============================================================================
// NULL Handling
// ============================================================================

mod null_handling {
    use super::*;

    #[test]
    fn test_null_to_option() {
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(Option::<String>::from_sql(&SqlValue::Null).unwrap(), None);
    }

    #[test]
    fn test_null_to_non_option_fails() {
        assert!(matches!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull)));
        assert!(matches!(String::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull)));
    }

    #[test]
    fn test_null_through_every_length_kind() {
        for info in [
            TypeInfo::new(TypeId::IntN).with_length(4),
            TypeInfo::new(TypeId::NVarChar).with_length(20),
            TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP),
            TypeInfo::new(TypeId::Image),
            TypeInfo::new(TypeId::DateTime2).with_scale(7),
        ] {
            assert_eq!(through_wire(SqlValue::Null, &info), SqlValue::Null, "{info:?}");
        }
    }

    #[test]
    fn test_null_into_fixed_type_fails() {
        let info = TypeInfo::new(TypeId::Int4);
        assert!(matches!(
            encode_param(SqlValue::Null, &ValueMeta::new(&info)),
            Err(TypeError::NullNotAllowed("int"))
        ));
    }

    #[test]
    fn test_option_to_sql() {
        assert!(None::<i32>.to_sql().unwrap().is_null());
        assert_eq!(Some(42i32).to_sql().unwrap(), SqlValue::Int(42));
    }
}

// ============================================================================
// Decimal and money
// ============================================================================

mod numeric {
    use super::*;

    fn dec(s: &str) -> SqlValue {
        SqlValue::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_decimal_rounds_half_away_from_zero() {
        let info = TypeInfo::new(TypeId::DecimalN).with_length(17).with_precision(10, 2);
        assert_eq!(through_wire(dec("2.345"), &info), dec("2.35"));
        assert_eq!(through_wire(dec("-2.345"), &info), dec("-2.35"));
    }

    #[test]
    fn test_decimal_precision_overflow() {
        let info = TypeInfo::new(TypeId::DecimalN).with_length(17).with_precision(4, 2);
        assert!(matches!(
            encode_param(dec("100.00"), &ValueMeta::new(&info)),
            Err(TypeError::PrecisionExceeded { precision: 4, .. })
        ));
        assert_eq!(through_wire(dec("99.99"), &info), dec("99.99"));
    }

    #[test]
    fn test_decimal_at_full_precision() {
        let info = TypeInfo::new(TypeId::DecimalN).with_length(17).with_precision(28, 0);
        let max = dec("9999999999999999999999999999");
        assert_eq!(through_wire(max.clone(), &info), max);
    }

    #[test]
    fn test_decimal_38_digits_round_trip() {
        let info = TypeInfo::new(TypeId::DecimalN).with_length(17).with_precision(38, 4);
        let widest = Numeric::new(-(10i128.pow(38) - 1), 4).unwrap();
        let back = through_wire(SqlValue::Numeric(widest), &info);
        assert_eq!(back, SqlValue::Numeric(widest));
        assert_eq!(back.to_sql().unwrap().type_name(), "decimal");

        let text = format!("-{}.9999", "9".repeat(34));
        assert_eq!(Numeric::from_sql(&back).unwrap().to_string(), text);
        assert!(matches!(
            Decimal::from_sql(&back),
            Err(TypeError::OutOfRange { target_type: "Decimal", .. })
        ));
        assert!(f64::from_sql(&back).unwrap() < -9.9e33);

        // Values rust_decimal can hold still come back as Decimal.
        let fits = dec("7922816251426433759354395.0335");
        assert_eq!(through_wire(fits.clone(), &info), fits);
        assert_eq!(Numeric::from_sql(&fits).unwrap().to_decimal(), fits.as_decimal());
    }

    #[test]
    fn test_money_boundaries() {
        let money = TypeInfo::new(TypeId::MoneyN).with_length(8);
        assert_eq!(
            through_wire(dec("922337203685477.5807"), &money),
            dec("922337203685477.5807")
        );
        assert_eq!(
            through_wire(dec("-922337203685477.5808"), &money),
            dec("-922337203685477.5808")
        );
        assert!(matches!(
            encode_param(dec("922337203685477.5808"), &ValueMeta::new(&money)),
            Err(TypeError::OutOfRange { target_type: "money", .. })
        ));

        let small = TypeInfo::new(TypeId::MoneyN).with_length(4);
        assert_eq!(through_wire(dec("-214748.3648"), &small), dec("-214748.3648"));
        assert!(encode_param(dec("214748.3648"), &ValueMeta::new(&small)).is_err());
    }

    #[test]
    fn test_integer_narrowing() {
        let tiny = TypeInfo::new(TypeId::IntN).with_length(1);
        assert_eq!(through_wire(SqlValue::BigInt(255), &tiny), SqlValue::TinyInt(255));
        assert!(encode_param(SqlValue::BigInt(256), &ValueMeta::new(&tiny)).is_err());
        assert_eq!(u8::from_sql(&SqlValue::TinyInt(255)).unwrap(), 255);
        assert!(u8::from_sql(&SqlValue::Int(-1)).is_err());
    }

    proptest! {
        #[test]
        fn any_i64_survives_bigint(v in any::<i64>()) {
            let info = TypeInfo::new(TypeId::IntN).with_length(8);
            prop_assert_eq!(through_wire(SqlValue::BigInt(v), &info), SqlValue::BigInt(v));
        }

        #[test]
        fn money_keeps_four_places(units in any::<i64>()) {
            let info = TypeInfo::new(TypeId::MoneyN).with_length(8);
            let value = SqlValue::Decimal(Decimal::new(units, 4));
            prop_assert_eq!(through_wire(value.clone(), &info), value);
        }
    }
}

// ============================================================================
// Strings and binary
// ============================================================================

mod strings {
    use super::*;

    #[test]
    fn test_unicode_boundaries() {
        let info = TypeInfo::new(TypeId::NVarChar).with_length(8);
        // one astral character is a surrogate pair: 4 bytes
        assert_eq!(through_wire(SqlValue::from("a😀b"), &info), SqlValue::from("a😀b"));
        assert!(matches!(
            encode_param(SqlValue::from("😀😀a"), &ValueMeta::new(&info)),
            Err(TypeError::TooLong { length: 10, max: 8, .. })
        ));
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let info = TypeInfo::new(TypeId::NVarChar).with_length(20);
        assert_eq!(through_wire(SqlValue::from(""), &info), SqlValue::from(""));
        let max = TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP);
        assert_eq!(through_wire(SqlValue::from(""), &max), SqlValue::from(""));
    }

    #[test]
    fn test_large_value_goes_as_plp() {
        let text = "x".repeat(50_000);
        let info = infer_type_info(&SqlValue::from(text.as_str()));
        assert!(info.is_max());
        let chunks = encode_param(SqlValue::from(text.as_str()), &ValueMeta::new(&info)).unwrap();
        assert!(chunks.len() > 3, "expected several PLP chunks");
        assert_eq!(&chunks[0][..], &100_000u64.to_le_bytes());
        assert_eq!(through_wire(SqlValue::from(text.as_str()), &info), SqlValue::from(text));
    }

    #[test]
    fn test_legacy_text_and_image() {
        let text = TypeInfo::new(TypeId::Text).with_length(0x7FFF_FFFF);
        assert_eq!(through_wire(SqlValue::from("legacy"), &text), SqlValue::from("legacy"));

        let image = TypeInfo::new(TypeId::Image).with_length(0x7FFF_FFFF);
        let chunks = encode_param(SqlValue::from(vec![1u8, 2, 3]), &ValueMeta::new(&image).in_row()).unwrap();
        assert_eq!(chunks[0][0], 0x10);
        let chunks = encode_param(SqlValue::from(vec![1u8, 2, 3]), &ValueMeta::new(&image)).unwrap();
        assert_eq!(&chunks[0][..], &3u32.to_le_bytes());
        assert_eq!(
            through_wire(SqlValue::from(vec![1u8, 2, 3]), &image),
            SqlValue::from(vec![1u8, 2, 3])
        );
    }

    #[test]
    fn test_declarations_follow_type_info() {
        let cases = [
            (TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP), "nvarchar(max)"),
            (TypeInfo::new(TypeId::NChar).with_length(20), "nchar(10)"),
            (TypeInfo::new(TypeId::BigVarBinary).with_length(8000), "varbinary(8000)"),
            (TypeInfo::new(TypeId::DecimalN).with_precision(18, 4), "decimal(18, 4)"),
            (TypeInfo::new(TypeId::Guid).with_length(16), "uniqueidentifier"),
            (TypeInfo::new(TypeId::DateTimeOffset).with_scale(3), "datetimeoffset(3)"),
        ];
        for (info, expected) in cases {
            assert_eq!(data_type(info.type_id).declaration(&info), expected);
        }
    }

    proptest! {
        #[test]
        fn any_string_survives_nvarchar_max(s in ".{0,300}") {
            let info = TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP);
            prop_assert_eq!(through_wire(SqlValue::from(s.as_str()), &info), SqlValue::from(s));
        }
    }
}
