//! Splitting payloads into packets and joining packets back into messages.
//!
//! [`frame`] produces the packets of one outbound message lazily;
//! [`Reassembler`] consumes raw inbound bytes in arbitrarily sized pieces and
//! yields complete [`Message`]s.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, peek_packet_length};

/// A single framed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload bytes (`header.length - 8` of them).
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet, computing the header length from the payload.
    #[must_use]
    pub fn new(packet_type: PacketType, status: PacketStatus, payload: Bytes) -> Self {
        let length = (PACKET_HEADER_SIZE + payload.len()) as u16;
        Self {
            header: PacketHeader::new(packet_type, status, length),
            payload,
        }
    }

    /// Total encoded size.
    #[must_use]
    pub fn len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether the packet carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Write header and payload.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.len());
        self.header.encode(dst);
        dst.put_slice(&self.payload);
    }
}

/// One logical request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type shared by every packet of the message.
    pub packet_type: PacketType,
    /// Status bits of the first packet (reset flags live there).
    pub first_status: PacketStatus,
    /// Concatenated payload of all non-ignored packets.
    pub payload: Bytes,
}

/// Split `payload` into packets of at most `packet_size` bytes.
///
/// `first_flags` is OR-ed into the status of the first packet only and is
/// meant for the reset-connection bits. The final packet carries
/// END_OF_MESSAGE; an empty payload still produces one packet.
#[must_use]
pub fn frame(
    packet_type: PacketType,
    payload: Bytes,
    packet_size: usize,
    first_flags: PacketStatus,
) -> Frames {
    Frames {
        packet_type,
        remaining: payload,
        chunk_size: packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1),
        next_id: 1,
        first_flags,
        finished: false,
    }
}

/// Number of packets [`frame`] produces for a payload of `len` bytes.
#[must_use]
pub fn packet_count(len: usize, packet_size: usize) -> usize {
    let chunk = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    len.div_ceil(chunk).max(1)
}

/// Lazy packet producer returned by [`frame`].
#[derive(Debug)]
pub struct Frames {
    packet_type: PacketType,
    remaining: Bytes,
    chunk_size: usize,
    next_id: u8,
    first_flags: PacketStatus,
    finished: bool,
}

impl Iterator for Frames {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.finished {
            return None;
        }

        let take = self.remaining.len().min(self.chunk_size);
        let chunk = self.remaining.split_to(take);
        let mut status = if self.remaining.is_empty() {
            self.finished = true;
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        if self.next_id == 1 {
            status |= self.first_flags;
        }

        let mut packet = Packet::new(self.packet_type, status, chunk);
        packet.header.packet_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        // Once the first packet is out, reset flags must not repeat after a wrap.
        self.first_flags = PacketStatus::NORMAL;
        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        let n = self.remaining.len().div_ceil(self.chunk_size).max(1);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Frames {}

#[derive(Debug)]
struct PartialMessage {
    packet_type: PacketType,
    first_status: PacketStatus,
    payload: BytesMut,
    expected_id: u8,
}

/// Joins decoded packets into messages.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    partial: Option<PartialMessage>,
}

impl PacketAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; returns the message it completes, if any.
    ///
    /// Ignored packets contribute no payload. An ignored final packet drops
    /// the whole message.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, ProtocolError> {
        let header = packet.header;
        let partial = self.partial.get_or_insert_with(|| PartialMessage {
            packet_type: header.packet_type,
            first_status: header.status,
            payload: BytesMut::new(),
            expected_id: header.packet_id,
        });

        if partial.packet_type != header.packet_type {
            let first = partial.packet_type as u8;
            self.partial = None;
            return Err(ProtocolError::MixedPacketTypes {
                first,
                next: header.packet_type as u8,
            });
        }
        if partial.expected_id != header.packet_id {
            tracing::trace!(
                expected = partial.expected_id,
                actual = header.packet_id,
                "packet id out of sequence"
            );
        }
        partial.expected_id = header.packet_id.wrapping_add(1);

        if !header.is_ignored() {
            partial.payload.extend_from_slice(&packet.payload);
        }

        if !header.is_end_of_message() {
            return Ok(None);
        }

        let Some(done) = self.partial.take() else {
            return Ok(None);
        };
        if header.is_ignored() {
            tracing::trace!(packet_type = ?done.packet_type, "discarding ignored message");
            return Ok(None);
        }
        Ok(Some(Message {
            packet_type: done.packet_type,
            first_status: done.first_status,
            payload: done.payload.freeze(),
        }))
    }

    /// Whether a message is partially assembled.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any partially assembled message.
    pub fn clear(&mut self) {
        self.partial = None;
    }
}

/// Byte-stream reassembler that tolerates any split of its input.
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    assembler: PacketAssembler,
    max_packet_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(u16::MAX as usize)
    }
}

impl Reassembler {
    /// Create a reassembler rejecting packets longer than `max_packet_size`.
    #[must_use]
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            assembler: PacketAssembler::new(),
            max_packet_size,
        }
    }

    /// Append raw bytes read from the transport.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet framed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete packet, or `Ok(None)` if more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        decode_packet(&mut self.buffer, self.max_packet_size)
    }

    /// Decode the next complete message, or `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        while let Some(packet) = self.next_packet()? {
            if let Some(message) = self.assembler.push(packet)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Whether bytes or packets of an unfinished message are pending.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.assembler.has_partial()
    }
}

/// Split one packet off the front of `src` if it is complete.
pub fn decode_packet(
    src: &mut BytesMut,
    max_packet_size: usize,
) -> Result<Option<Packet>, ProtocolError> {
    let Some(length) = peek_packet_length(src)? else {
        return Ok(None);
    };
    if length > max_packet_size {
        return Err(ProtocolError::PacketTooLarge {
            length,
            max: max_packet_size,
        });
    }
    if src.len() < length {
        src.reserve(length - src.len());
        return Ok(None);
    }

    let mut raw = src.split_to(length).freeze();
    let header = PacketHeader::decode(&mut raw)?;
    let payload = raw.copy_to_bytes(raw.remaining());
    Ok(Some(Packet { header, payload }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn encode_all(frames: Frames) -> BytesMut {
        let mut out = BytesMut::new();
        for packet in frames {
            packet.encode(&mut out);
        }
        out
    }

    #[test]
    fn empty_payload_yields_one_final_packet() {
        let packets: Vec<_> = frame(PacketType::SqlBatch, Bytes::new(), 512, PacketStatus::NORMAL).collect();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].header.is_end_of_message());
        assert_eq!(packets[0].header.length, 8);
    }

    #[test]
    fn exact_multiple_does_not_add_empty_packet() {
        let payload = Bytes::from(vec![7u8; 504 * 2]);
        let packets: Vec<_> = frame(PacketType::Rpc, payload, 512, PacketStatus::NORMAL).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packet_count(504 * 2, 512), 2);
        assert!(packets.iter().all(|p| p.len() == 512));
    }

    #[test]
    fn reset_flag_only_on_first_packet() {
        let payload = Bytes::from(vec![1u8; 2000]);
        let packets: Vec<_> =
            frame(PacketType::SqlBatch, payload, 512, PacketStatus::RESET_CONNECTION).collect();
        assert!(packets[0].header.status.contains(PacketStatus::RESET_CONNECTION));
        assert!(
            packets[1..]
                .iter()
                .all(|p| !p.header.status.contains(PacketStatus::RESET_CONNECTION))
        );
        let ids: Vec<u8> = packets.iter().map(|p| p.header.packet_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn packet_ids_wrap_at_256() {
        let payload = Bytes::from(vec![0u8; 300]);
        let packets: Vec<_> = frame(PacketType::BulkLoad, payload, 9, PacketStatus::NORMAL).collect();
        assert_eq!(packets.len(), 300);
        assert_eq!(packets[254].header.packet_id, 255);
        assert_eq!(packets[255].header.packet_id, 0);
        assert_eq!(packets[256].header.packet_id, 1);
    }

    #[test]
    fn reassembles_multi_packet_message() {
        let payload = Bytes::from((0..3000u32).map(|i| i as u8).collect::<Vec<_>>());
        let wire = encode_all(frame(PacketType::TabularResult, payload.clone(), 1024, PacketStatus::NORMAL));

        let mut reassembler = Reassembler::default();
        reassembler.extend_from_slice(&wire);
        let message = reassembler.next_message().unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(message.payload, payload);
        assert!(reassembler.next_message().unwrap().is_none());
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn waits_for_split_length_field() {
        let wire = encode_all(frame(PacketType::TabularResult, Bytes::from_static(b"abc"), 512, PacketStatus::NORMAL));
        let mut reassembler = Reassembler::default();
        reassembler.extend_from_slice(&wire[..3]);
        assert!(reassembler.next_message().unwrap().is_none());
        reassembler.extend_from_slice(&wire[3..]);
        assert_eq!(reassembler.next_message().unwrap().unwrap().payload.as_ref(), b"abc");
    }

    #[test]
    fn ignored_packet_payload_is_discarded() {
        let mut first = Packet::new(PacketType::TabularResult, PacketStatus::IGNORE, Bytes::from_static(b"xx"));
        first.header.packet_id = 1;
        let mut last = Packet::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, Bytes::from_static(b"ok"));
        last.header.packet_id = 2;

        let mut assembler = PacketAssembler::new();
        assert!(assembler.push(first).unwrap().is_none());
        let message = assembler.push(last).unwrap().unwrap();
        assert_eq!(message.payload.as_ref(), b"ok");
    }

    #[test]
    fn ignored_final_packet_drops_message() {
        let body = Packet::new(PacketType::SqlBatch, PacketStatus::NORMAL, Bytes::from_static(b"SELECT"));
        let abort = Packet::new(
            PacketType::SqlBatch,
            PacketStatus::END_OF_MESSAGE | PacketStatus::IGNORE,
            Bytes::new(),
        );
        let mut assembler = PacketAssembler::new();
        assert!(assembler.push(body).unwrap().is_none());
        assert!(assembler.push(abort).unwrap().is_none());
        assert!(!assembler.has_partial());
    }

    #[test]
    fn zero_length_header_is_fatal() {
        let mut reassembler = Reassembler::default();
        reassembler.extend_from_slice(&[0x04, 0x01, 0x00, 0x00, 0, 0, 1, 0]);
        assert_eq!(
            reassembler.next_message(),
            Err(ProtocolError::InvalidPacketLength(0))
        );
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let mut reassembler = Reassembler::new(512);
        reassembler.extend_from_slice(&[0x04, 0x01, 0x04, 0x00]);
        assert!(matches!(
            reassembler.next_packet(),
            Err(ProtocolError::PacketTooLarge { length: 1024, max: 512 })
        ));
    }

    #[test]
    fn mixed_types_within_message_are_fatal() {
        let mut assembler = PacketAssembler::new();
        let first = Packet::new(PacketType::TabularResult, PacketStatus::NORMAL, Bytes::from_static(b"a"));
        let second = Packet::new(PacketType::Rpc, PacketStatus::END_OF_MESSAGE, Bytes::from_static(b"b"));
        assembler.push(first).unwrap();
        assert!(matches!(
            assembler.push(second),
            Err(ProtocolError::MixedPacketTypes { .. })
        ));
    }
}
