//! Incremental message framing.
//!
//! [`tds_protocol::frame`] splits a payload that is already in memory.
//! [`MessageWriter`] frames a payload that is produced piece by piece, such as
//! bulk load rows pulled lazily from a caller's iterator, holding at most one
//! packet's worth of bytes.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketStatus, PacketType};

use crate::packet_codec::Packet;

pub use tds_protocol::Message;

/// Frames a message whose payload arrives in pieces.
///
/// A packet is emitted only once more than a full packet's payload is
/// buffered, so the final packet produced by [`finish`](Self::finish) always
/// carries END_OF_MESSAGE, even when it is empty.
#[derive(Debug)]
pub struct MessageWriter {
    packet_type: PacketType,
    chunk_size: usize,
    buffer: BytesMut,
    next_id: u8,
    first_flags: PacketStatus,
    packets: usize,
}

impl MessageWriter {
    /// Writer for a message of `packet_type` using packets of `packet_size`.
    ///
    /// `first_flags` is applied to the first packet only.
    #[must_use]
    pub fn new(packet_type: PacketType, packet_size: usize, first_flags: PacketStatus) -> Self {
        let chunk_size = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
        Self {
            packet_type,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            next_id: 1,
            first_flags,
            packets: 0,
        }
    }

    /// Buffer `data`, returning any packets that are now full.
    pub fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        self.buffer.extend_from_slice(data);
        let mut ready = Vec::new();
        while self.buffer.len() > self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size).freeze();
            ready.push(self.packet(chunk, PacketStatus::NORMAL));
        }
        ready
    }

    /// Bytes buffered but not yet packed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Packets produced so far.
    #[must_use]
    pub fn packets(&self) -> usize {
        self.packets
    }

    /// Produce the final packet.
    #[must_use]
    pub fn finish(mut self) -> Packet {
        let rest = std::mem::take(&mut self.buffer).freeze();
        self.packet(rest, PacketStatus::END_OF_MESSAGE)
    }

    fn packet(&mut self, payload: Bytes, status: PacketStatus) -> Packet {
        let status = status | std::mem::replace(&mut self.first_flags, PacketStatus::NORMAL);
        let mut packet = Packet::new(self.packet_type, status, payload);
        packet.header.packet_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.packets += 1;
        packet
    }
}
