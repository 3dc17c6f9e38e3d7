//! Split I/O connection.
//!
//! The transport is split into read and write halves so an Attention packet
//! can be written from another task while the owner is blocked reading a
//! response.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, PacketStatus, PacketType};
use tds_protocol::{PacketAssembler, ProtocolError, frame};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageWriter};
use crate::packet_codec::Packet;

type SharedWriter<T> = Arc<Mutex<PacketWriter<WriteHalf<T>>>>;

const ATTENTION_IDLE: u8 = 0;
const ATTENTION_REQUESTED: u8 = 1;
const ATTENTION_SENT: u8 = 2;

/// Attention bookkeeping shared by a connection, its senders and an open
/// [`MessageSink`].
///
/// While a sink is open the Attention is only requested; the sink writes it
/// after the message's last packet so the two never interleave on the wire.
#[derive(Debug, Default)]
struct AttentionState {
    phase: AtomicU8,
    streaming: AtomicBool,
}

impl AttentionState {
    fn pending(&self) -> bool {
        self.phase.load(Ordering::Acquire) != ATTENTION_IDLE
    }

    fn claim(&self, from: u8, to: u8) -> bool {
        self.phase
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn attention_packet() -> Packet {
    Packet::new(PacketType::Attention, PacketStatus::END_OF_MESSAGE, Bytes::new())
}

/// One packet's worth of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    /// Type of the message the chunk belongs to.
    pub packet_type: PacketType,
    /// Packet payload; empty for ignored packets.
    pub payload: Bytes,
    /// Whether this is the last chunk of the message.
    pub last: bool,
}

/// A TDS connection over a split transport.
///
/// Outbound messages are framed at the negotiated packet size. Inbound
/// messages are read either whole ([`read_message`](Self::read_message)) or a
/// packet at a time ([`read_chunk`](Self::read_chunk)) so large results can
/// be parsed as they arrive.
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: SharedWriter<T>,
    assembler: PacketAssembler,
    packet_size: usize,
    inbound: Option<PacketType>,
    attention: Arc<AttentionState>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Split `transport` and frame outbound messages at `packet_size`.
    pub fn new(transport: T, packet_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            reader: PacketReader::new(read_half),
            writer: Arc::new(Mutex::new(PacketWriter::new(write_half))),
            assembler: PacketAssembler::new(),
            packet_size: packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE),
            inbound: None,
            attention: Arc::new(AttentionState::default()),
        }
    }

    /// Current outbound packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Adopt a packet size announced by the server.
    pub fn set_packet_size(&mut self, size: usize) -> Result<(), CodecError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(CodecError::InvalidPacketSize(size));
        }
        tracing::debug!(old = self.packet_size, new = size, "packet size changed");
        self.packet_size = size;
        Ok(())
    }

    /// Handle for cancelling the in-flight request from another task.
    #[must_use]
    pub fn attention_sender(&self) -> AttentionSender<T> {
        AttentionSender {
            writer: Arc::clone(&self.writer),
            state: Arc::clone(&self.attention),
        }
    }

    /// Whether an Attention was requested and its acknowledgement not yet
    /// seen.
    #[must_use]
    pub fn attention_pending(&self) -> bool {
        self.attention.pending()
    }

    /// Record that the server acknowledged the Attention.
    pub fn clear_attention(&self) {
        self.attention.phase.store(ATTENTION_IDLE, Ordering::Release);
    }

    /// Read the next raw packet. `None` at end of stream.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, CodecError>
    where
        T: Unpin,
    {
        self.reader.next().await.transpose()
    }

    /// Read the next complete message. `None` if the peer closed the
    /// connection between messages.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError>
    where
        T: Unpin,
    {
        loop {
            let Some(packet) = self.read_packet().await? else {
                if self.assembler.has_partial() {
                    self.assembler.clear();
                    return Err(CodecError::ConnectionClosed);
                }
                return Ok(None);
            };
            if let Some(message) = self.assembler.push(packet)? {
                tracing::trace!(
                    packet_type = ?message.packet_type,
                    length = message.payload.len(),
                    "received message"
                );
                return Ok(Some(message));
            }
        }
    }

    /// Read the next packet of the current inbound message.
    ///
    /// End of stream is always an error here: the caller is waiting for a
    /// response.
    pub async fn read_chunk(&mut self) -> Result<MessageChunk, CodecError>
    where
        T: Unpin,
    {
        let Some(packet) = self.read_packet().await? else {
            self.inbound = None;
            return Err(CodecError::ConnectionClosed);
        };
        let header = packet.header;
        let packet_type = *self.inbound.get_or_insert(header.packet_type);
        if packet_type != header.packet_type {
            self.inbound = None;
            return Err(ProtocolError::MixedPacketTypes {
                first: packet_type as u8,
                next: header.packet_type as u8,
            }
            .into());
        }

        let last = header.is_end_of_message();
        if last {
            self.inbound = None;
        }
        let payload = if header.is_ignored() {
            tracing::trace!(packet_id = header.packet_id, "skipping ignored packet");
            Bytes::new()
        } else {
            packet.payload
        };
        Ok(MessageChunk {
            packet_type,
            payload,
            last,
        })
    }

    /// Frame and send a complete message, then flush.
    ///
    /// `first_flags` is applied to the first packet only and carries the
    /// reset-connection bits.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        first_flags: PacketStatus,
    ) -> Result<(), CodecError>
    where
        T: Unpin,
    {
        let length = payload.len();
        let mut writer = self.writer.lock().await;
        let mut packets = 0usize;
        for packet in frame(packet_type, payload, self.packet_size, first_flags) {
            writer.feed(packet).await?;
            packets += 1;
        }
        writer.flush().await?;
        tracing::trace!(?packet_type, length, packets, "sent message");
        Ok(())
    }

    /// Begin a message whose payload is produced incrementally.
    ///
    /// Until the sink is finished, Attention requests are held back and
    /// written after the message's last packet.
    pub fn start_message(&mut self, packet_type: PacketType, first_flags: PacketStatus) -> MessageSink<'_, T> {
        self.attention.streaming.store(true, Ordering::Release);
        MessageSink {
            writer: Arc::clone(&self.writer),
            attention: Arc::clone(&self.attention),
            framer: MessageWriter::new(packet_type, self.packet_size, first_flags),
            _connection: std::marker::PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("attention_pending", &self.attention_pending())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// An outbound message being streamed packet by packet.
///
/// Borrows the connection mutably, so no other request can interleave.
pub struct MessageSink<'a, T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: SharedWriter<T>,
    attention: Arc<AttentionState>,
    framer: MessageWriter,
    _connection: std::marker::PhantomData<&'a mut Connection<T>>,
}

impl<T> MessageSink<'_, T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Append payload bytes, sending any packets that fill up.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let ready = self.framer.push(data);
        if ready.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        for packet in ready {
            writer.feed(packet).await?;
        }
        writer.flush().await
    }

    /// Whether an Attention was requested since the message started.
    ///
    /// Producers should stop writing; [`finish`](Self::finish) then marks
    /// the message as ignored and sends the Attention.
    #[must_use]
    pub fn attention_requested(&self) -> bool {
        self.attention.pending()
    }

    /// Send the final packet and flush. Returns the number of packets sent.
    ///
    /// If an Attention was requested while the message was open, the final
    /// packet also carries the ignore bit so the server discards the whole
    /// message, and the Attention follows it.
    pub async fn finish(self) -> Result<usize, CodecError> {
        let packets = self.framer.packets() + 1;
        let mut last = self.framer.finish();
        let packet_type = last.header.packet_type;
        let mut writer = self.writer.lock().await;
        self.attention.streaming.store(false, Ordering::Release);
        if self.attention.claim(ATTENTION_REQUESTED, ATTENTION_SENT) {
            last.header.status |= PacketStatus::IGNORE;
            writer.feed(last).await?;
            writer.feed(attention_packet()).await?;
            writer.flush().await?;
            tracing::debug!(?packet_type, packets, "streamed message abandoned, attention sent");
            return Ok(packets);
        }
        writer.send(last).await?;
        tracing::trace!(?packet_type, packets, "sent streamed message");
        Ok(packets)
    }
}

/// Sends Attention on behalf of a [`Connection`].
///
/// Cloneable and usable from any task. Sending only writes the packet; the
/// connection owner drains the response until the server acknowledges.
pub struct AttentionSender<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: SharedWriter<T>,
    state: Arc<AttentionState>,
}

impl<T> AttentionSender<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Request an Attention and write it once no message is being streamed.
    ///
    /// Only the first caller since the last acknowledgement writes anything;
    /// later calls return `false`. If a [`MessageSink`] is open the packet is
    /// written by its `finish` instead.
    pub async fn send_attention(&self) -> Result<bool, CodecError> {
        if !self.state.claim(ATTENTION_IDLE, ATTENTION_REQUESTED) {
            tracing::trace!("attention already requested");
            return Ok(false);
        }
        let mut writer = self.writer.lock().await;
        if self.state.streaming.load(Ordering::Acquire) {
            tracing::debug!("attention deferred until the outbound message ends");
            return Ok(true);
        }
        if self.state.claim(ATTENTION_REQUESTED, ATTENTION_SENT) {
            tracing::debug!("sending attention");
            writer.send(attention_packet()).await?;
        }
        Ok(true)
    }

    /// Whether an Attention is awaiting acknowledgement.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.pending()
    }
}

impl<T> Clone for AttentionSender<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for AttentionSender<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttentionSender")
            .field("pending", &self.state.pending())
            .finish_non_exhaustive()
    }
}
