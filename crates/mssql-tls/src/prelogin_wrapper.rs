//! Carries the TLS handshake inside PRELOGIN packets.
//!
//! Until the handshake completes, records written by rustls are framed as
//! PRELOGIN packets and inbound packet headers are stripped before rustls
//! sees the bytes. Afterwards the wrapper is a pass-through and TLS records
//! travel directly on the socket.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use tds_protocol::frame;
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketStatus, PacketType, peek_packet_length};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter that frames handshake traffic as PRELOGIN packets.
#[derive(Debug)]
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    packet_size: usize,

    header: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,

    write_buf: BytesMut,
    out: Bytes,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream` for a handshake using the default packet size.
    pub fn new(stream: S) -> Self {
        Self::with_packet_size(stream, DEFAULT_PACKET_SIZE)
    }

    /// Wrap `stream`, splitting handshake flights at `packet_size`.
    pub fn with_packet_size(stream: S, packet_size: usize) -> Self {
        Self {
            stream,
            pending_handshake: true,
            packet_size,
            header: [0; PACKET_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            write_buf: BytesMut::new(),
            out: Bytes::new(),
        }
    }

    /// Stop framing; subsequent bytes pass through unchanged.
    pub fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }

    /// Whether handshake framing is still active.
    pub fn is_handshaking(&self) -> bool {
        self.pending_handshake
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> TlsPreloginWrapper<S> {
    /// Read the next packet header, returning `false` at a clean end of stream.
    fn poll_header(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<bool>> {
        while self.header_pos < PACKET_HEADER_SIZE {
            let mut header = ReadBuf::new(&mut self.header[self.header_pos..]);
            ready!(Pin::new(&mut self.stream).poll_read(cx, &mut header))?;
            let n = header.filled().len();
            if n == 0 {
                if self.header_pos == 0 {
                    return Poll::Ready(Ok(false));
                }
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }
            self.header_pos += n;
        }

        self.header_pos = 0;
        let packet_type = self.header[0];
        if packet_type != PacketType::PreLogin as u8 && packet_type != PacketType::TabularResult as u8 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected packet type 0x{packet_type:02X} during TLS handshake"),
            )));
        }
        let length = peek_packet_length(&self.header)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .unwrap_or(PACKET_HEADER_SIZE);
        self.read_remaining = length - PACKET_HEADER_SIZE;
        tracing::trace!(payload = self.read_remaining, "handshake packet");
        Poll::Ready(Ok(true))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        // Skip empty packets until payload or end of stream.
        while this.read_remaining == 0 {
            if !ready!(this.poll_header(cx))? {
                return Poll::Ready(Ok(()));
            }
        }

        let want = this.read_remaining.min(buf.remaining());
        let mut scratch = vec![0u8; want];
        let mut limited = ReadBuf::new(&mut scratch);
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        buf.put_slice(&scratch[..n]);
        this.read_remaining -= n;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }
        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.out.is_empty() && !this.write_buf.is_empty() {
            let flight = this.write_buf.split().freeze();
            let mut framed = BytesMut::new();
            for packet in frame(PacketType::PreLogin, flight, this.packet_size, PacketStatus::NORMAL) {
                packet.encode(&mut framed);
            }
            tracing::trace!(length = framed.len(), "sending handshake flight");
            this.out = framed.freeze();
        }

        while !this.out.is_empty() {
            let n = ready!(Pin::new(&mut this.stream).poll_write(cx, &this.out))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.out.advance(n);
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_writes_are_framed_until_complete() {
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        let mut wrapper = TlsPreloginWrapper::with_packet_size(client, 512);

        wrapper.write_all(&[0x16; 600]).await.unwrap();
        wrapper.flush().await.unwrap();

        let mut first = [0u8; 512];
        server.read_exact(&mut first).await.unwrap();
        assert_eq!(first[0], PacketType::PreLogin as u8);
        assert_eq!(first[1], 0);
        let mut second = [0u8; 8 + 96];
        server.read_exact(&mut second).await.unwrap();
        assert_eq!(second[1], PacketStatus::END_OF_MESSAGE.bits());
        assert_eq!(u16::from_be_bytes([second[2], second[3]]), 104);

        wrapper.handshake_complete();
        wrapper.write_all(b"raw").await.unwrap();
        wrapper.flush().await.unwrap();
        let mut raw = [0u8; 3];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"raw");
    }

    #[tokio::test]
    async fn test_reads_strip_headers() {
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        let mut wrapper = TlsPreloginWrapper::new(client);

        let mut wire = Vec::new();
        for (payload, eom) in [(&b"abc"[..], 0u8), (&b"def"[..], 1u8)] {
            wire.extend_from_slice(&[0x12, eom, 0, (8 + payload.len()) as u8, 0, 0, 1, 0]);
            wire.extend_from_slice(payload);
        }
        server.write_all(&wire).await.unwrap();
        drop(server);

        let mut out = Vec::new();
        wrapper.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[tokio::test]
    async fn test_rejects_other_packet_types() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut wrapper = TlsPreloginWrapper::new(client);
        server.write_all(&[0x01, 1, 0, 9, 0, 0, 1, 0, 0]).await.unwrap();
        let mut byte = [0u8; 1];
        let err = wrapper.read(&mut byte).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
