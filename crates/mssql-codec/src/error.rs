//! Transport error types.

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while moving packets over a transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Socket read or write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that are not valid TDS framing.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport reached end of stream, possibly mid-message.
    #[error("connection closed")]
    ConnectionClosed,

    /// A packet size outside `512..=32767` was requested.
    #[error("invalid packet size {0}")]
    InvalidPacketSize(usize),
}

impl CodecError {
    /// Whether the transport itself failed, as opposed to carrying bad data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}
