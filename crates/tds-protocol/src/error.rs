//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while framing, parsing or encoding TDS data.
///
/// Every variant except the incomplete-input ones ([`ProtocolError::Incomplete`],
/// [`ProtocolError::UnexpectedEof`]) describes corrupt or unsupported wire data
/// and is fatal to the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes to decode a fixed-size structure.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The buffer ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// The buffer is `needed` bytes short of the structure being read.
    #[error("{needed} more bytes needed")]
    Incomplete {
        /// Missing bytes, counted from the read that failed.
        needed: usize,
    },

    /// A single token would need more buffering than the parser allows.
    #[error("token of at least {size} bytes exceeds the {max} byte buffer limit")]
    TokenTooLarge {
        /// Bytes the token needs so far.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Packet header length field is smaller than the header itself.
    #[error("invalid packet length {0}")]
    InvalidPacketLength(u16),

    /// Packet length exceeds the negotiated packet size.
    #[error("packet of {length} bytes exceeds negotiated size {max}")]
    PacketTooLarge {
        /// Declared packet length.
        length: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Undefined bits set in the packet status byte.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// A packet of a different type arrived in the middle of a message.
    #[error("packet type changed mid-message from 0x{first:02X} to 0x{next:02X}")]
    MixedPacketTypes {
        /// Type of the first packet.
        first: u8,
        /// Type of the offending packet.
        next: u8,
    },

    /// Unknown token type byte in a response stream.
    #[error("unknown token type: 0x{0:02X}")]
    UnknownToken(u8),

    /// A row arrived before any column metadata.
    #[error("row token received before column metadata")]
    RowWithoutMetadata,

    /// Unknown data type in column metadata.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownDataType(u8),

    /// Unknown pre-login option.
    #[error("invalid pre-login option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Value length does not fit the data type.
    #[error("invalid length {length} for {type_name}")]
    InvalidLength {
        /// Offending length.
        length: usize,
        /// Type description.
        type_name: &'static str,
    },

    /// Environment change carried a value that could not be interpreted.
    #[error("invalid env change: {0}")]
    InvalidEnvChange(String),

    /// Message ended while a token body was still incomplete.
    #[error("message ended inside a {0} token")]
    TruncatedToken(&'static str),

    /// String payload was not valid UTF-16.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// Outbound value is too large for the wire field.
    #[error("{field} too long: {length} exceeds {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        length: usize,
        /// Maximum length.
        max: usize,
    },
}

impl ProtocolError {
    /// Whether more input could resolve this error.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof | Self::Incomplete { .. } | Self::IncompletePacket { .. }
        )
    }

    /// Lower bound on the bytes that must arrive before a retry can succeed.
    #[must_use]
    pub const fn shortfall(&self) -> usize {
        match self {
            Self::Incomplete { needed } => *needed,
            Self::IncompletePacket { expected, actual } => expected.saturating_sub(*actual),
            _ => 1,
        }
    }
}
