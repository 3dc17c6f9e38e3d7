//! # mssql-types
//!
//! SQL Server value codec driven by `TYPE_INFO`.
//!
//! Every wire type id maps to one [`DataType`] implementation through
//! [`data_type`]. Codecs validate and coerce [`SqlValue`]s against the
//! declared length, precision and range, produce the bare value bytes, and
//! decode row values back. Length prefixes, PLP chunking and legacy LOB
//! text pointers are derived from the `TYPE_INFO` so parameters, bulk-load
//! rows and result rows share one encoding path.
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC`/`MONEY` | `rust_decimal::Decimal` |
//! | `DECIMAL(38, s)` beyond 96 bits | [`Numeric`] |
//! | `CHAR`/`VARCHAR`/`TEXT` | `String` |
//! | `NCHAR`/`NVARCHAR`/`NTEXT` | `String` |
//! | `BINARY`/`VARBINARY`/`IMAGE` | `bytes::Bytes` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME`/`DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod binary;
pub mod data_type;
pub mod datetime;
pub mod error;
pub mod from_sql;
mod guid;
mod numeric;
pub mod plp;
pub mod row;
mod string;
mod temporal;
pub mod to_sql;
pub mod value;
mod variant;

pub use data_type::{
    DataType, Target, ValueChunks, ValueMeta, data_type, decode_value, encode_param, infer_type_info, length_prefix,
    row_length_prefix, type_name,
};
pub use datetime::DateTimePolicy;
pub use error::TypeError;
pub use from_sql::FromSql;
pub use numeric::Numeric;
pub use plp::{PLP_CHUNK_SIZE, PlpChunks};
pub use row::{ColumnIndex, Row};
pub use to_sql::ToSql;
pub use value::SqlValue;
