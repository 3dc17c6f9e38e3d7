//! # tds-protocol
//!
//! IO-free implementation of the MS-TDS wire protocol spoken by Microsoft
//! SQL Server: packet framing and reassembly, the pre-login and LOGIN7
//! handshake messages, an incremental token stream parser, and encoders for
//! SQL batches, RPCs and transaction manager requests.
//!
//! Nothing here touches a socket. `mssql-codec` wraps these pieces in a
//! tokio codec and `mssql-client` drives the connection state machine.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use tds_protocol::{PacketStatus, PacketType, SqlBatch, frame};
//!
//! let payload = SqlBatch::new("SELECT 1").encode();
//! let packets: Vec<_> = frame(PacketType::SqlBatch, payload, 4096, PacketStatus::NORMAL).collect();
//! assert_eq!(packets.len(), 1);
//! assert!(packets[0].header.is_end_of_message());
//! # let _ = Bytes::new();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod framer;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod tx_manager;
pub mod types;
pub mod version;

pub use collation::Collation;
pub use error::ProtocolError;
pub use framer::{Frames, Message, Packet, PacketAssembler, Reassembler, decode_packet, frame, packet_count};
pub use login7::{FedAuth, FeatureId, Login7, LoginCredentials, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use prelogin::{EncryptionLevel, NegotiatedEncryption, PreLogin, PreLoginOption};
pub use rpc::{ParamStatus, ProcId, ProcName, RpcOptionFlags, RpcParam, RpcRequest};
pub use sql_batch::{ALL_HEADERS_SIZE, SqlBatch, write_all_headers};
pub use token::{
    ColMetaData, ColumnData, DEFAULT_MAX_BUFFERED, Done, DoneStatus, EnvChange, FeatureAck, FedAuthInfo, LoginAck,
    Parsed, RawRow, ReturnValue, ServerMessage, Token, TokenParser, TokenType,
};
pub use tx_manager::{IsolationLevel, TransactionRequest};
pub use types::{ColumnFlags, MAX_LENGTH_PLP, PLP_NULL, PLP_UNKNOWN_LENGTH, TypeId, TypeInfo, ValueLength};
pub use version::TdsVersion;
