//! # mssql-codec
//!
//! Async packet transport for TDS.
//!
//! Turns a byte stream into TDS packets and messages and back. Outbound
//! messages are split at the negotiated packet size; inbound packets are
//! joined by their END_OF_MESSAGE bit.
//!
//! ```text
//! transport → TdsCodec (packets) → Connection (messages, chunks) → client
//! ```
//!
//! ## Cancellation
//!
//! [`Connection`] splits its transport so that an [`AttentionSender`] can
//! write an Attention packet from another task while the owner is blocked
//! reading a large result.
//!
//! ```rust,ignore
//! use mssql_codec::Connection;
//!
//! let mut conn = Connection::new(tcp_stream, 4096);
//! let attention = conn.attention_sender();
//!
//! tokio::spawn(async move {
//!     attention.send_attention().await?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{AttentionSender, Connection, MessageChunk, MessageSink};
pub use error::CodecError;
pub use framed::{PacketReader, PacketStream, PacketWriter};
pub use message::{Message, MessageWriter};
pub use packet_codec::{Packet, TdsCodec};
