//! TDS packet header.
//!
//! Header layout (all multi-byte fields big-endian):
//!
//! ```text
//! +------+--------+--------+------+----------+--------+
//! | type | status | length | spid | packet id| window |
//! |  u8  |   u8   |  u16   | u16  |    u8    |   u8   |
//! +------+--------+--------+------+----------+--------+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Size of the fixed packet header.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Default negotiated packet size.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest packet size a client may request.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest packet size a client may request.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Message type tag carried by every packet of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Server response.
    TabularResult = 0x04,
    /// Attention (cancel) signal.
    Attention = 0x06,
    /// Bulk load row data.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// LOGIN7 request.
    Tds7Login = 0x10,
    /// SSPI continuation.
    Sspi = 0x11,
    /// Pre-login negotiation.
    PreLogin = 0x12,
}

impl PacketType {
    /// Decode a packet type byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => Self::SqlBatch,
            0x03 => Self::Rpc,
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x07 => Self::BulkLoad,
            0x08 => Self::FedAuthToken,
            0x0E => Self::TransactionManager,
            0x10 => Self::Tds7Login,
            0x11 => Self::Sspi,
            0x12 => Self::PreLogin,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }
}

bitflags! {
    /// Packet status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketStatus: u8 {
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Receiver must discard this packet.
        const IGNORE = 0x02;
        /// Reset session state before running the request.
        const RESET_CONNECTION = 0x08;
        /// Reset session state but keep the current transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

impl PacketStatus {
    /// Status of a packet that is neither last nor special.
    pub const NORMAL: Self = Self::empty();
}

/// An 8-byte TDS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub packet_type: PacketType,
    /// Status bits.
    pub status: PacketStatus,
    /// Header plus payload length.
    pub length: u16,
    /// Server process id.
    pub spid: u16,
    /// Sequence number within the message, wrapping at 256.
    pub packet_id: u8,
    /// Unused, always zero.
    pub window: u8,
}

impl PacketHeader {
    /// Header with packet id 1 and zero SPID.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Decode a header, rejecting lengths that cannot hold the header itself.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let raw_status = src.get_u8();
        let status = PacketStatus::from_bits(raw_status)
            .ok_or(ProtocolError::InvalidPacketStatus(raw_status))?;
        let length = src.get_u16();
        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(length));
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid: src.get_u16(),
            packet_id: src.get_u8(),
            window: src.get_u8(),
        })
    }

    /// Write the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload bytes following the header.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length as usize - PACKET_HEADER_SIZE
    }

    /// Whether this packet closes its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Whether the receiver must discard this packet.
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        self.status.contains(PacketStatus::IGNORE)
    }

    /// Replace the packet id.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

/// Peek the declared length of a packet whose header starts `src`.
///
/// Returns `Ok(None)` until at least the length field has arrived.
pub fn peek_packet_length(src: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if src.len() < 4 {
        return Ok(None);
    }
    let length = u16::from_be_bytes([src[2], src[3]]);
    if (length as usize) < PACKET_HEADER_SIZE {
        return Err(ProtocolError::InvalidPacketLength(length));
    }
    Ok(Some(length as usize))
}
