//! `tokio-util` codec over the TDS packet header.

use bytes::BytesMut;
use tds_protocol::packet::MAX_PACKET_SIZE;
pub use tds_protocol::Packet;
use tds_protocol::{ProtocolError, decode_packet};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Packet codec for `FramedRead`/`FramedWrite`.
///
/// Decoding suspends until the whole declared length is buffered. Encoding
/// writes packets as framed, keeping their ids and status bits.
#[derive(Debug, Clone)]
pub struct TdsCodec {
    max_packet_size: usize,
}

impl TdsCodec {
    /// Codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Limit accepted and produced packets to `size` bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
        self
    }

    /// Largest packet accepted.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(packet) = decode_packet(src, self.max_packet_size)? else {
            return Ok(None);
        };
        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            length = packet.header.length,
            packet_id = packet.header.packet_id,
            eom = packet.header.is_end_of_message(),
            "decoded packet"
        );
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        if item.len() > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                length: item.len(),
                max: self.max_packet_size,
            }
            .into());
        }
        item.encode(dst);
        tracing::trace!(
            packet_type = ?item.header.packet_type,
            length = item.len(),
            packet_id = item.header.packet_id,
            "encoded packet"
        );
        Ok(())
    }
}
