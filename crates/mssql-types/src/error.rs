//! Value codec errors.

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while encoding, decoding or validating a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// NULL where a value was required.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// NULL sent to a fixed-length type, which has no NULL representation.
    #[error("{0} does not accept NULL")]
    NullNotAllowed(&'static str),

    /// The value cannot be represented as the requested type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Type of the supplied value.
        actual: &'static str,
    },

    /// The value is outside the type's range.
    #[error("value {value} out of range for {target_type}")]
    OutOfRange {
        /// Target type.
        target_type: &'static str,
        /// Offending value.
        value: String,
    },

    /// A decimal has more significant digits than the declared precision.
    #[error("value {value} exceeds precision {precision}")]
    PrecisionExceeded {
        /// Declared precision.
        precision: u8,
        /// Offending value after rounding to the declared scale.
        value: String,
    },

    /// A string or binary value is longer than the declared length.
    #[error("{type_name} value of {length} bytes exceeds maximum length {max}")]
    TooLong {
        /// Target type.
        type_name: &'static str,
        /// Encoded length.
        length: usize,
        /// Declared maximum.
        max: usize,
    },

    /// Text could not be converted to or from the column's code page.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// Malformed binary data on the wire.
    #[error("invalid binary data: {0}")]
    InvalidBinary(String),

    /// Date or time outside the representable range.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Decimal that cannot be represented.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// A row has no column with the given name or position.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// The type is understood on the wire but cannot be sent.
    #[error("unsupported type: {0}")]
    Unsupported(String),

    /// Malformed `TYPE_INFO` or length prefix.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
