//! Response token stream.
//!
//! A server response is a sequence of tokens, each introduced by a one-byte
//! [`TokenType`]. [`TokenParser`] pulls tokens out of a byte buffer that is
//! fed one packet payload at a time: a token whose body is not fully buffered
//! yet is left untouched and retried once more bytes arrive.
//!
//! ```rust,ignore
//! let mut parser = TokenParser::new();
//! let mut metadata = None;
//! loop {
//!     match parser.next_token(metadata.as_deref())? {
//!         Parsed::Token(Token::ColMetaData(meta)) => metadata = Some(meta),
//!         Parsed::Token(token) => handle(token),
//!         Parsed::NeedMoreData => match read_payload().await? {
//!             Some((payload, last)) => {
//!                 parser.extend(payload);
//!                 if last {
//!                     parser.finish();
//!                 }
//!             }
//!             None => break,
//!         },
//!         Parsed::Finished => break,
//!     }
//! }
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    decode_utf16_bytes, ensure, read_b_varbyte, read_b_varchar, read_us_varchar, read_utf16,
    utf16_len, write_b_varchar, write_us_varchar, write_utf16,
};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, TypeInfo};
use crate::version::TdsVersion;

/// Token type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Result set column metadata.
    ColMetaData = 0x81,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Login acknowledgement.
    LoginAck = 0xAD,
    /// Row.
    Row = 0xD1,
    /// Null-bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// SSPI challenge.
    Sspi = 0xED,
    /// Statement completion.
    Done = 0xFD,
    /// Stored procedure completion.
    DoneProc = 0xFE,
    /// Statement completion inside a procedure.
    DoneInProc = 0xFF,
    /// Procedure return status.
    ReturnStatus = 0x79,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// ORDER BY columns.
    Order = 0xA9,
    /// Feature extension acknowledgement.
    FeatureExtAck = 0xAE,
    /// Federated authentication parameters.
    FedAuthInfo = 0xEE,
    /// Session state (skipped).
    SessionState = 0xE4,
    /// Browse-mode column info (skipped).
    ColInfo = 0xA5,
    /// Browse-mode table names (skipped).
    TabName = 0xA4,
    /// Keyword offsets (skipped).
    Offset = 0x78,
}

impl TokenType {
    /// Decode a token type byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x81 => Self::ColMetaData,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xED => Self::Sspi,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            0x79 => Self::ReturnStatus,
            0xAC => Self::ReturnValue,
            0xA9 => Self::Order,
            0xAE => Self::FeatureExtAck,
            0xEE => Self::FedAuthInfo,
            0xE4 => Self::SessionState,
            0xA5 => Self::ColInfo,
            0xA4 => Self::TabName,
            0x78 => Self::Offset,
            other => return Err(ProtocolError::UnknownToken(other)),
        })
    }

    /// Upper-case token name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ColMetaData => "COLMETADATA",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::LoginAck => "LOGINACK",
            Self::Row => "ROW",
            Self::NbcRow => "NBCROW",
            Self::EnvChange => "ENVCHANGE",
            Self::Sspi => "SSPI",
            Self::Done => "DONE",
            Self::DoneProc => "DONEPROC",
            Self::DoneInProc => "DONEINPROC",
            Self::ReturnStatus => "RETURNSTATUS",
            Self::ReturnValue => "RETURNVALUE",
            Self::Order => "ORDER",
            Self::FeatureExtAck => "FEATUREEXTACK",
            Self::FedAuthInfo => "FEDAUTHINFO",
            Self::SessionState => "SESSIONSTATE",
            Self::ColInfo => "COLINFO",
            Self::TabName => "TABNAME",
            Self::Offset => "OFFSET",
        }
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Column metadata for the following rows.
    ColMetaData(Arc<ColMetaData>),
    /// Row.
    Row(RawRow),
    /// Null-bitmap compressed row.
    NbcRow(RawRow),
    /// Statement completion.
    Done(Done),
    /// Procedure completion.
    DoneProc(Done),
    /// Statement completion inside a procedure.
    DoneInProc(Done),
    /// Procedure return status.
    ReturnStatus(i32),
    /// Output parameter.
    ReturnValue(ReturnValue),
    /// Server error.
    Error(ServerMessage),
    /// Server informational message.
    Info(ServerMessage),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Environment change.
    EnvChange(EnvChange),
    /// ORDER BY column ordinals.
    Order(Vec<u16>),
    /// Feature extension acknowledgements.
    FeatureExtAck(Vec<FeatureAck>),
    /// Federated authentication parameters.
    FedAuthInfo(FedAuthInfo),
    /// SSPI challenge blob.
    Sspi(Bytes),
}

// -----------------------------------------------------------------------------
// COLMETADATA and rows
// -----------------------------------------------------------------------------

/// `COLMETADATA` column count meaning "no metadata".
pub const NO_METADATA: u16 = 0xFFFF;

/// Result set column descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColMetaData {
    /// Columns in result order.
    pub columns: Vec<ColumnData>,
}

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnData {
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Table name parts, present for `text`/`ntext`/`image`.
    pub table_name: Option<Vec<String>>,
    /// Column name.
    pub name: String,
}

impl ColumnData {
    /// Column with no flags and no user type.
    #[must_use]
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            user_type: 0,
            flags: ColumnFlags::empty(),
            type_info,
            table_name: None,
            name: name.into(),
        }
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let type_info = TypeInfo::decode(src)?;

        let table_name = if type_info.type_id.is_legacy_lob() {
            ensure(src, 1)?;
            let parts = src.get_u8();
            let mut names = Vec::with_capacity(parts as usize);
            for _ in 0..parts {
                names.push(read_us_varchar(src)?);
            }
            Some(names)
        } else {
            None
        };

        let name = read_b_varchar(src)?;
        Ok(Self {
            user_type,
            flags,
            type_info,
            table_name,
            name,
        })
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u32_le(self.user_type);
        dst.put_u16_le(self.flags.bits());
        self.type_info.encode(dst)?;
        if self.type_info.type_id.is_legacy_lob() {
            let parts = self.table_name.as_deref().unwrap_or_default();
            let count = u8::try_from(parts.len()).map_err(|_| ProtocolError::FieldTooLong {
                field: "table name parts",
                length: parts.len(),
                max: u8::MAX as usize,
            })?;
            dst.put_u8(count);
            for part in parts {
                write_us_varchar(dst, part)?;
            }
        }
        write_b_varchar(dst, &self.name)
    }
}

impl ColMetaData {
    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the token carried no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Decode the token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let count = src.get_u16_le();
        if count == NO_METADATA {
            return Ok(Self::default());
        }
        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            columns.push(ColumnData::decode(src)?);
        }
        Ok(Self { columns })
    }

    /// Write the token, including its type byte.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u8(TokenType::ColMetaData as u8);
        if self.columns.is_empty() {
            dst.put_u16_le(NO_METADATA);
            return Ok(());
        }
        let count = u16::try_from(self.columns.len())
            .ok()
            .filter(|&n| n != NO_METADATA)
            .ok_or(ProtocolError::FieldTooLong {
                field: "column count",
                length: self.columns.len(),
                max: (NO_METADATA - 1) as usize,
            })?;
        dst.put_u16_le(count);
        for column in &self.columns {
            column.encode(dst)?;
        }
        Ok(())
    }
}

/// Undecoded row values, one entry per column, `None` for NULL.
///
/// Each present value is the raw wire representation with its length
/// prefix removed; PLP values have their chunks joined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    /// Column values in metadata order.
    pub values: Vec<Option<Bytes>>,
}

impl RawRow {
    /// Decode a `ROW` body.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|column| column.type_info.read_value(src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }

    /// Decode an `NBCROW` body: a null bitmap followed by the non-null values.
    pub fn decode_nbc(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let count = metadata.columns.len();
        let bitmap_len = count.div_ceil(8);
        ensure(src, bitmap_len)?;
        let bitmap = src.copy_to_bytes(bitmap_len);

        let mut values = Vec::with_capacity(count);
        for (i, column) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
            } else {
                values.push(column.type_info.read_value(src)?);
            }
        }
        Ok(Self { values })
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether column `index` is NULL. Out-of-range columns read as NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        !matches!(self.values.get(index), Some(Some(_)))
    }
}

// -----------------------------------------------------------------------------
// DONE
// -----------------------------------------------------------------------------

bitflags! {
    /// `DONE` status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention signal.
        const ATTN = 0x0020;
        /// Severe server error, results discarded.
        const SRVERROR = 0x0100;
    }
}

/// Body of `DONE`, `DONEPROC` and `DONEINPROC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Current command token.
    pub cur_cmd: u16,
    /// Rows affected, valid when `COUNT` is set.
    pub row_count: u64,
}

impl Done {
    /// Body size.
    pub const SIZE: usize = 12;

    /// A final `DONE` with no status bits.
    #[must_use]
    pub const fn finished() -> Self {
        Self {
            status: DoneStatus::empty(),
            cur_cmd: 0,
            row_count: 0,
        }
    }

    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Write as a token of the given done type.
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token_type as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Whether more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether the statement failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status.intersects(DoneStatus::ERROR.union(DoneStatus::SRVERROR))
    }

    /// Whether this acknowledges an attention.
    #[must_use]
    pub const fn is_attention_ack(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Row count, if the server supplied one.
    #[must_use]
    pub const fn rows(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.row_count)
        } else {
            None
        }
    }
}

// -----------------------------------------------------------------------------
// ERROR / INFO
// -----------------------------------------------------------------------------

/// Body of `ERROR` and `INFO` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let length = src.get_u16_le() as usize;
        ensure(src, length)?;
        ensure(src, 6)?;
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        ensure(src, 4)?;
        let line = src.get_i32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Write as an `ERROR` or `INFO` token.
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let length = 4
            + 1
            + 1
            + 2
            + 2 * utf16_len(&self.message)
            + 1
            + 2 * utf16_len(&self.server)
            + 1
            + 2 * utf16_len(&self.procedure)
            + 4;
        let length = u16::try_from(length).map_err(|_| ProtocolError::FieldTooLong {
            field: token_type.name(),
            length,
            max: u16::MAX as usize,
        })?;
        dst.put_u8(token_type as u8);
        dst.put_u16_le(length);
        dst.put_i32_le(self.number);
        dst.put_u8(self.state);
        dst.put_u8(self.class);
        write_us_varchar(dst, &self.message)?;
        write_b_varchar(dst, &self.server)?;
        write_b_varchar(dst, &self.procedure)?;
        dst.put_i32_le(self.line);
        Ok(())
    }

    /// Severity 20 and above terminates the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

// -----------------------------------------------------------------------------
// LOGINACK
// -----------------------------------------------------------------------------

/// Body of `LOGINACK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// SQL interface type.
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version bytes (major, minor, build high, build low).
    pub prog_version: [u8; 4],
}

impl LoginAck {
    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let length = src.get_u16_le() as usize;
        ensure(src, length)?;
        ensure(src, 5)?;
        let interface = src.get_u8();
        let tds_version = TdsVersion::new(src.get_u32());
        let prog_name = read_b_varchar(src)?;
        ensure(src, 4)?;
        let mut prog_version = [0u8; 4];
        src.copy_to_slice(&mut prog_version);
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Write the token.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let length = 1 + 4 + 1 + 2 * utf16_len(&self.prog_name) + 4;
        dst.put_u8(TokenType::LoginAck as u8);
        dst.put_u16_le(length as u16);
        dst.put_u8(self.interface);
        dst.put_u32(self.tds_version.raw());
        write_b_varchar(dst, &self.prog_name)?;
        dst.put_slice(&self.prog_version);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ENVCHANGE
// -----------------------------------------------------------------------------

/// A decoded environment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Character set changed.
    CharacterSet {
        /// New character set.
        new: String,
        /// Previous character set.
        old: String,
    },
    /// Negotiated packet size changed.
    PacketSize {
        /// New size.
        new: u32,
        /// Previous size.
        old: u32,
    },
    /// Session collation changed.
    Collation(Option<Collation>),
    /// A transaction started.
    BeginTransaction(u64),
    /// The transaction committed.
    CommitTransaction,
    /// The transaction rolled back.
    RollbackTransaction,
    /// The transaction ended without an explicit commit or rollback.
    TransactionEnded,
    /// The server acknowledged a connection reset.
    ResetConnectionAck,
    /// The client must reconnect elsewhere.
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// An environment change this client does not act on.
    Other {
        /// Raw change type.
        kind: u8,
        /// Undecoded value bytes.
        data: Bytes,
    },
}

mod env_type {
    pub const DATABASE: u8 = 1;
    pub const LANGUAGE: u8 = 2;
    pub const CHARACTER_SET: u8 = 3;
    pub const PACKET_SIZE: u8 = 4;
    pub const COLLATION: u8 = 7;
    pub const BEGIN_TRANSACTION: u8 = 8;
    pub const COMMIT_TRANSACTION: u8 = 9;
    pub const ROLLBACK_TRANSACTION: u8 = 10;
    pub const TRANSACTION_ENDED: u8 = 17;
    pub const RESET_CONNECTION_ACK: u8 = 18;
    pub const ROUTING: u8 = 20;
}

impl EnvChange {
    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let length = src.get_u16_le() as usize;
        ensure(src, length)?;
        let mut body = src.copy_to_bytes(length);
        // The body is complete, so a short read inside it is corruption.
        Self::decode_body(&mut body).map_err(|e| {
            if e.is_incomplete() {
                ProtocolError::InvalidEnvChange("value overruns token length".into())
            } else {
                e
            }
        })
    }

    fn decode_body(body: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(body, 1)?;
        let kind = body.get_u8();
        Ok(match kind {
            env_type::DATABASE => Self::Database {
                new: read_b_varchar(body)?,
                old: read_b_varchar(body)?,
            },
            env_type::LANGUAGE => Self::Language {
                new: read_b_varchar(body)?,
                old: read_b_varchar(body)?,
            },
            env_type::CHARACTER_SET => Self::CharacterSet {
                new: read_b_varchar(body)?,
                old: read_b_varchar(body)?,
            },
            env_type::PACKET_SIZE => {
                let new = read_b_varchar(body)?;
                let old = read_b_varchar(body)?;
                Self::PacketSize {
                    new: new.parse().map_err(|_| {
                        ProtocolError::InvalidEnvChange(format!("packet size {new:?}"))
                    })?,
                    old: old.parse().unwrap_or(0),
                }
            }
            env_type::COLLATION => {
                let new = read_b_varbyte(body)?;
                if new.is_empty() {
                    Self::Collation(None)
                } else {
                    Self::Collation(Some(Collation::from_bytes(&new)?))
                }
            }
            env_type::BEGIN_TRANSACTION => {
                let new = read_b_varbyte(body)?;
                let descriptor: [u8; 8] = new.as_ref().try_into().map_err(|_| {
                    ProtocolError::InvalidEnvChange(format!(
                        "transaction descriptor of {} bytes",
                        new.len()
                    ))
                })?;
                Self::BeginTransaction(u64::from_le_bytes(descriptor))
            }
            env_type::COMMIT_TRANSACTION => Self::CommitTransaction,
            env_type::ROLLBACK_TRANSACTION => Self::RollbackTransaction,
            env_type::TRANSACTION_ENDED => Self::TransactionEnded,
            env_type::RESET_CONNECTION_ACK => Self::ResetConnectionAck,
            env_type::ROUTING => {
                ensure(body, 2 + 1 + 2 + 2)?;
                let _value_len = body.get_u16_le();
                let _protocol = body.get_u8();
                let port = body.get_u16_le();
                let host_len = body.get_u16_le() as usize;
                let host = read_utf16(body, host_len)?;
                Self::Routing { host, port }
            }
            kind => Self::Other {
                kind,
                data: body.split_off(0),
            },
        })
    }

    /// Write the token.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        match self {
            Self::Database { new, old } => put_strings(&mut body, env_type::DATABASE, new, old)?,
            Self::Language { new, old } => put_strings(&mut body, env_type::LANGUAGE, new, old)?,
            Self::CharacterSet { new, old } => {
                put_strings(&mut body, env_type::CHARACTER_SET, new, old)?;
            }
            Self::PacketSize { new, old } => put_strings(
                &mut body,
                env_type::PACKET_SIZE,
                &new.to_string(),
                &old.to_string(),
            )?,
            Self::Collation(collation) => {
                body.put_u8(env_type::COLLATION);
                match collation {
                    Some(collation) => {
                        body.put_u8(5);
                        collation.encode(&mut body);
                    }
                    None => body.put_u8(0),
                }
                body.put_u8(0);
            }
            Self::BeginTransaction(descriptor) => {
                body.put_u8(env_type::BEGIN_TRANSACTION);
                body.put_u8(8);
                body.put_u64_le(*descriptor);
                body.put_u8(0);
            }
            Self::CommitTransaction => put_empty(&mut body, env_type::COMMIT_TRANSACTION),
            Self::RollbackTransaction => put_empty(&mut body, env_type::ROLLBACK_TRANSACTION),
            Self::TransactionEnded => put_empty(&mut body, env_type::TRANSACTION_ENDED),
            Self::ResetConnectionAck => put_empty(&mut body, env_type::RESET_CONNECTION_ACK),
            Self::Routing { host, port } => {
                let host_len = utf16_len(host);
                body.put_u8(env_type::ROUTING);
                body.put_u16_le((1 + 2 + 2 + 2 * host_len) as u16);
                body.put_u8(0);
                body.put_u16_le(*port);
                body.put_u16_le(host_len as u16);
                write_utf16(&mut body, host);
                body.put_u16_le(0);
            }
            Self::Other { kind, data } => {
                body.put_u8(*kind);
                body.put_slice(data);
            }
        }
        let length = u16::try_from(body.len()).map_err(|_| ProtocolError::FieldTooLong {
            field: "ENVCHANGE",
            length: body.len(),
            max: u16::MAX as usize,
        })?;
        dst.put_u8(TokenType::EnvChange as u8);
        dst.put_u16_le(length);
        dst.put_slice(&body);
        Ok(())
    }
}

fn put_strings(body: &mut BytesMut, kind: u8, new: &str, old: &str) -> Result<(), ProtocolError> {
    body.put_u8(kind);
    write_b_varchar(body, new)?;
    write_b_varchar(body, old)
}

fn put_empty(body: &mut BytesMut, kind: u8) {
    body.put_u8(kind);
    body.put_u8(0);
    body.put_u8(0);
}

// -----------------------------------------------------------------------------
// RETURNVALUE
// -----------------------------------------------------------------------------

/// An output parameter or UDF result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name, including the leading `@`.
    pub name: String,
    /// 0x01 for an output parameter, 0x02 for a UDF return value.
    pub status: u8,
    /// User type id.
    pub user_type: u32,
    /// Column-style flags.
    pub flags: ColumnFlags,
    /// Wire type of the value.
    pub type_info: TypeInfo,
    /// Raw value, `None` for NULL.
    pub value: Option<Bytes>,
}

impl ReturnValue {
    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let ordinal = src.get_u16_le();
        let name = read_b_varchar(src)?;
        ensure(src, 1 + 4 + 2)?;
        let status = src.get_u8();
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let type_info = TypeInfo::decode(src)?;
        let value = type_info.read_value(src)?;
        Ok(Self {
            ordinal,
            name,
            status,
            user_type,
            flags,
            type_info,
            value,
        })
    }
}

// -----------------------------------------------------------------------------
// FEATUREEXTACK / FEDAUTHINFO
// -----------------------------------------------------------------------------

/// One acknowledged feature extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Feature id.
    pub feature_id: u8,
    /// Feature-specific data.
    pub data: Bytes,
}

const FEATURE_TERMINATOR: u8 = 0xFF;

fn decode_feature_ext_ack(src: &mut impl Buf) -> Result<Vec<FeatureAck>, ProtocolError> {
    let mut features = Vec::new();
    loop {
        ensure(src, 1)?;
        let feature_id = src.get_u8();
        if feature_id == FEATURE_TERMINATOR {
            return Ok(features);
        }
        ensure(src, 4)?;
        let len = src.get_u32_le() as usize;
        ensure(src, len)?;
        features.push(FeatureAck {
            feature_id,
            data: src.copy_to_bytes(len),
        });
    }
}

/// Parameters the client needs to obtain a federated authentication token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FedAuthInfo {
    /// Token endpoint.
    pub sts_url: String,
    /// Service principal name.
    pub spn: String,
}

impl FedAuthInfo {
    const STS_URL: u8 = 0x01;
    const SPN: u8 = 0x02;

    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 4)?;
        let length = src.get_u32_le() as usize;
        ensure(src, length)?;
        let body = src.copy_to_bytes(length);
        Self::decode_body(&body).map_err(|e| {
            if e.is_incomplete() {
                ProtocolError::InvalidLength {
                    length,
                    type_name: "FEDAUTHINFO",
                }
            } else {
                e
            }
        })
    }

    fn decode_body(body: &Bytes) -> Result<Self, ProtocolError> {
        let mut cursor = body.clone();
        ensure(&cursor, 4)?;
        let count = cursor.get_u32_le();
        let mut info = Self::default();
        for _ in 0..count {
            ensure(&cursor, 9)?;
            let id = cursor.get_u8();
            let len = cursor.get_u32_le() as usize;
            let offset = cursor.get_u32_le() as usize;
            let data = body
                .get(offset..offset.saturating_add(len))
                .ok_or(ProtocolError::UnexpectedEof)?;
            match id {
                Self::STS_URL => info.sts_url = decode_utf16_bytes(data)?,
                Self::SPN => info.spn = decode_utf16_bytes(data)?,
                _ => {}
            }
        }
        Ok(info)
    }

    /// Write the token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let sts: Vec<u8> = self.sts_url.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let spn: Vec<u8> = self.spn.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let header = 4 + 2 * 9;
        dst.put_u8(TokenType::FedAuthInfo as u8);
        dst.put_u32_le((header + sts.len() + spn.len()) as u32);
        dst.put_u32_le(2);
        dst.put_u8(Self::STS_URL);
        dst.put_u32_le(sts.len() as u32);
        dst.put_u32_le(header as u32);
        dst.put_u8(Self::SPN);
        dst.put_u32_le(spn.len() as u32);
        dst.put_u32_le((header + sts.len()) as u32);
        dst.put_slice(&sts);
        dst.put_slice(&spn);
    }
}

// -----------------------------------------------------------------------------
// Parser
// -----------------------------------------------------------------------------

/// Result of asking the parser for the next token.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A complete token.
    Token(Token),
    /// The buffered bytes end before the next token is complete.
    NeedMoreData,
    /// The message is finished and fully consumed.
    Finished,
}

/// Default cap on bytes buffered for a single incomplete token.
pub const DEFAULT_MAX_BUFFERED: usize = 256 * 1024 * 1024;

/// Incremental pull parser over the payload of one response message.
///
/// Packet payloads are queued as they arrive and only joined when a token
/// spanning them can be decoded. A token that needs more input is retried
/// once the bytes it declared are buffered, so a large value spread over
/// many packets is parsed a bounded number of times.
#[derive(Debug)]
pub struct TokenParser {
    data: Bytes,
    pending: Vec<Bytes>,
    pending_len: usize,
    wanted: usize,
    max_buffered: usize,
    finished: bool,
}

impl Default for TokenParser {
    fn default() -> Self {
        Self {
            data: Bytes::new(),
            pending: Vec::new(),
            pending_len: 0,
            wanted: 0,
            max_buffered: DEFAULT_MAX_BUFFERED,
            finished: false,
        }
    }
}

impl TokenParser {
    /// Parser expecting more input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser over a complete message.
    #[must_use]
    pub fn from_message(payload: Bytes) -> Self {
        Self {
            data: payload,
            finished: true,
            ..Self::default()
        }
    }

    /// Limit the bytes a single incomplete token may hold buffered.
    #[must_use]
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    /// Append the next packet payload.
    pub fn extend(&mut self, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        if self.data.is_empty() && self.pending.is_empty() {
            self.data = payload;
        } else {
            self.pending_len += payload.len();
            self.pending.push(payload);
        }
    }

    /// Mark the end of the message; no more input will follow.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Whether [`finish`](Self::finish) has been called.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.data.len() + self.pending_len
    }

    /// Pull the next token.
    ///
    /// `metadata` is the most recent `COLMETADATA` of the current response
    /// and is required to decode rows. Legacy browse-mode tokens and
    /// session state are consumed silently.
    ///
    /// # Errors
    ///
    /// Fails on malformed data, on a message that ends inside a token, and
    /// with [`ProtocolError::TokenTooLarge`] when one token would need more
    /// than the buffer limit.
    pub fn next_token(&mut self, metadata: Option<&ColMetaData>) -> Result<Parsed, ProtocolError> {
        loop {
            if !self.finished && self.buffered() < self.wanted {
                return Ok(Parsed::NeedMoreData);
            }
            self.wanted = 0;
            self.coalesce();

            if self.data.is_empty() {
                return Ok(if self.finished {
                    Parsed::Finished
                } else {
                    Parsed::NeedMoreData
                });
            }

            let token_type = TokenType::from_u8(self.data[0])?;
            let mut cursor = self.data.slice(1..);
            match decode_token(token_type, &mut cursor, metadata) {
                Ok(token) => {
                    self.data = cursor;
                    if let Some(token) = token {
                        tracing::trace!(token = token_type.name(), "decoded token");
                        return Ok(Parsed::Token(token));
                    }
                }
                Err(e) if e.is_incomplete() => {
                    if self.finished {
                        return Err(ProtocolError::TruncatedToken(token_type.name()));
                    }
                    let wanted = self.data.len().saturating_add(e.shortfall().max(1));
                    if wanted > self.max_buffered {
                        return Err(ProtocolError::TokenTooLarge {
                            size: wanted,
                            max: self.max_buffered,
                        });
                    }
                    self.wanted = wanted;
                    return Ok(Parsed::NeedMoreData);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Join queued payloads onto the unconsumed bytes.
    fn coalesce(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut joined = BytesMut::with_capacity(self.buffered());
        joined.extend_from_slice(&self.data);
        for chunk in self.pending.drain(..) {
            joined.extend_from_slice(&chunk);
        }
        self.pending_len = 0;
        self.data = joined.freeze();
    }
}

fn decode_token(
    token_type: TokenType,
    src: &mut Bytes,
    metadata: Option<&ColMetaData>,
) -> Result<Option<Token>, ProtocolError> {
    let token = match token_type {
        TokenType::ColMetaData => Token::ColMetaData(Arc::new(ColMetaData::decode(src)?)),
        TokenType::Row => {
            let metadata = metadata.ok_or(ProtocolError::RowWithoutMetadata)?;
            Token::Row(RawRow::decode(src, metadata)?)
        }
        TokenType::NbcRow => {
            let metadata = metadata.ok_or(ProtocolError::RowWithoutMetadata)?;
            Token::NbcRow(RawRow::decode_nbc(src, metadata)?)
        }
        TokenType::Done => Token::Done(Done::decode(src)?),
        TokenType::DoneProc => Token::DoneProc(Done::decode(src)?),
        TokenType::DoneInProc => Token::DoneInProc(Done::decode(src)?),
        TokenType::Error => Token::Error(ServerMessage::decode(src)?),
        TokenType::Info => Token::Info(ServerMessage::decode(src)?),
        TokenType::LoginAck => Token::LoginAck(LoginAck::decode(src)?),
        TokenType::EnvChange => Token::EnvChange(EnvChange::decode(src)?),
        TokenType::ReturnStatus => {
            ensure(src, 4)?;
            Token::ReturnStatus(src.get_i32_le())
        }
        TokenType::ReturnValue => Token::ReturnValue(ReturnValue::decode(src)?),
        TokenType::Order => {
            ensure(src, 2)?;
            let length = src.get_u16_le() as usize;
            ensure(src, length)?;
            let mut body = src.split_to(length);
            let mut columns = Vec::with_capacity(length / 2);
            while body.remaining() >= 2 {
                columns.push(body.get_u16_le());
            }
            Token::Order(columns)
        }
        TokenType::FeatureExtAck => Token::FeatureExtAck(decode_feature_ext_ack(src)?),
        TokenType::FedAuthInfo => Token::FedAuthInfo(FedAuthInfo::decode(src)?),
        TokenType::Sspi => {
            ensure(src, 2)?;
            let length = src.get_u16_le() as usize;
            ensure(src, length)?;
            Token::Sspi(src.split_to(length))
        }
        TokenType::SessionState => {
            ensure(src, 4)?;
            let length = src.get_u32_le() as usize;
            ensure(src, length)?;
            src.advance(length);
            return Ok(None);
        }
        TokenType::ColInfo | TokenType::TabName => {
            ensure(src, 2)?;
            let length = src.get_u16_le() as usize;
            ensure(src, length)?;
            src.advance(length);
            return Ok(None);
        }
        TokenType::Offset => {
            ensure(src, 4)?;
            src.advance(4);
            return Ok(None);
        }
    };
    Ok(Some(token))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    fn int_metadata() -> ColMetaData {
        ColMetaData {
            columns: vec![ColumnData::new("n", TypeInfo::new(TypeId::Int4))],
        }
    }

    /// `SELECT 42 AS n`: metadata, one row, done with count 1.
    fn select_42() -> Vec<u8> {
        let mut buf = Vec::new();
        int_metadata().encode(&mut buf).unwrap();
        buf.push(TokenType::Row as u8);
        buf.extend_from_slice(&42i32.to_le_bytes());
        Done {
            status: DoneStatus::COUNT,
            cur_cmd: 0xC1,
            row_count: 1,
        }
        .encode(TokenType::Done, &mut buf);
        buf
    }

    fn collect(parser: &mut TokenParser) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut metadata: Option<Arc<ColMetaData>> = None;
        while let Parsed::Token(token) = parser.next_token(metadata.as_deref()).unwrap() {
            if let Token::ColMetaData(meta) = &token {
                metadata = Some(meta.clone());
            }
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn select_42_decodes() {
        let mut parser = TokenParser::from_message(Bytes::from(select_42()));
        let tokens = collect(&mut parser);
        assert_eq!(tokens.len(), 3);
        match &tokens[0] {
            Token::ColMetaData(meta) => {
                assert_eq!(meta.column_count(), 1);
                assert_eq!(meta.columns[0].name, "n");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &tokens[1] {
            Token::Row(row) => {
                assert_eq!(row.values[0].as_deref(), Some(&42i32.to_le_bytes()[..]));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &tokens[2] {
            Token::Done(done) => assert_eq!(done.rows(), Some(1)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parser.next_token(None).unwrap(), Parsed::Finished);
    }

    #[test]
    fn every_split_point_yields_the_same_tokens() {
        let stream = select_42();
        let expected = collect(&mut TokenParser::from_message(Bytes::from(stream.clone())));

        for split in 0..=stream.len() {
            let mut parser = TokenParser::new();
            let mut metadata: Option<Arc<ColMetaData>> = None;
            let mut tokens = Vec::new();
            let mut pending = vec![
                Bytes::copy_from_slice(&stream[..split]),
                Bytes::copy_from_slice(&stream[split..]),
            ]
            .into_iter();
            loop {
                match parser.next_token(metadata.as_deref()).unwrap() {
                    Parsed::Token(token) => {
                        if let Token::ColMetaData(meta) = &token {
                            metadata = Some(meta.clone());
                        }
                        tokens.push(token);
                    }
                    Parsed::NeedMoreData => match pending.next() {
                        Some(chunk) => parser.extend(chunk),
                        None => parser.finish(),
                    },
                    Parsed::Finished => break,
                }
            }
            assert_eq!(tokens, expected, "split at {split}");
        }
    }

    fn binary_metadata(length: u32) -> ColMetaData {
        ColMetaData {
            columns: vec![ColumnData::new("b", TypeInfo::new(TypeId::BigVarBinary).with_length(length))],
        }
    }

    /// Feed `stream` in `step`-byte packets, counting how often the parser
    /// joined its queued packets.
    fn feed_in_packets(
        parser: &mut TokenParser,
        metadata: &ColMetaData,
        stream: &[u8],
        step: usize,
    ) -> (RawRow, usize) {
        let mut joins = 0;
        for chunk in stream.chunks(step) {
            parser.extend(Bytes::copy_from_slice(chunk));
            let queued = parser.pending.len();
            match parser.next_token(Some(metadata)).unwrap() {
                Parsed::Token(Token::Row(row)) => return (row, joins + usize::from(queued > 0)),
                Parsed::NeedMoreData => {
                    if queued > 0 && parser.pending.is_empty() {
                        joins += 1;
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        panic!("row never completed");
    }

    #[test]
    fn spanning_value_is_parsed_once_its_length_arrives() {
        let metadata = binary_metadata(8000);
        let value: Vec<u8> = (0..6000u32).map(|i| i as u8).collect();
        let mut stream = vec![TokenType::Row as u8];
        stream.extend_from_slice(&6000u16.to_le_bytes());
        stream.extend_from_slice(&value);

        let mut parser = TokenParser::new();
        let (row, joins) = feed_in_packets(&mut parser, &metadata, &stream, 100);
        assert_eq!(row.values[0].as_deref(), Some(&value[..]));
        assert_eq!(joins, 1);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn plp_value_waits_for_its_declared_total() {
        let metadata = binary_metadata(crate::types::MAX_LENGTH_PLP);
        let value: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        let mut stream = vec![TokenType::Row as u8];
        stream.extend_from_slice(&(value.len() as u64).to_le_bytes());
        for chunk in value.chunks(4000) {
            stream.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            stream.extend_from_slice(chunk);
        }
        stream.extend_from_slice(&0u32.to_le_bytes());

        let mut parser = TokenParser::new();
        let (row, joins) = feed_in_packets(&mut parser, &metadata, &stream, 4088);
        assert_eq!(row.values[0].as_deref(), Some(&value[..]));
        assert!(joins <= 3, "joined {joins} times");
    }

    #[test]
    fn oversized_token_is_rejected() {
        let metadata = binary_metadata(8000);
        let mut parser = TokenParser::new().with_max_buffered(1024);
        let mut head = vec![TokenType::Row as u8];
        head.extend_from_slice(&6000u16.to_le_bytes());
        head.extend_from_slice(&[0u8; 10]);
        parser.extend(Bytes::from(head));
        assert_eq!(
            parser.next_token(Some(&metadata)),
            Err(ProtocolError::TokenTooLarge { size: 6003, max: 1024 })
        );
    }

    #[test]
    fn consumed_packets_are_not_copied() {
        let stream = select_42();
        let mut parser = TokenParser::new();
        parser.extend(Bytes::from(stream));
        let tokens = collect(&mut parser);
        assert_eq!(tokens.len(), 3);
        parser.extend(Bytes::from_static(&[0xFD]));
        assert!(parser.pending.is_empty());
        assert_eq!(parser.buffered(), 1);
    }

    #[test]
    fn truncated_token_after_finish_is_fatal() {
        let stream = select_42();
        let mut parser = TokenParser::from_message(Bytes::copy_from_slice(&stream[..stream.len() - 3]));
        let mut metadata: Option<Arc<ColMetaData>> = None;
        let err = loop {
            match parser.next_token(metadata.as_deref()) {
                Ok(Parsed::Token(Token::ColMetaData(meta))) => metadata = Some(meta),
                Ok(Parsed::Token(_)) => {}
                Ok(other) => panic!("unexpected {other:?}"),
                Err(e) => break e,
            }
        };
        assert_eq!(err, ProtocolError::TruncatedToken("DONE"));
    }

    #[test]
    fn unknown_token_is_fatal() {
        let mut parser = TokenParser::from_message(Bytes::from_static(&[0x42, 0, 0]));
        assert_eq!(parser.next_token(None), Err(ProtocolError::UnknownToken(0x42)));
    }

    #[test]
    fn row_before_metadata_is_fatal() {
        let mut parser = TokenParser::from_message(Bytes::from_static(&[0xD1, 1, 0, 0, 0]));
        assert_eq!(parser.next_token(None), Err(ProtocolError::RowWithoutMetadata));
    }

    #[test]
    fn nbc_row_bitmap_marks_nulls() {
        let metadata = ColMetaData {
            columns: (0..10)
                .map(|i| ColumnData::new(format!("c{i}"), TypeInfo::new(TypeId::IntN).with_length(4)))
                .collect(),
        };
        // Columns 1 and 9 are NULL and absent from the value stream.
        let mut raw = vec![0b0000_0010, 0b0000_0010];
        for i in 0..10u8 {
            if i != 1 && i != 9 {
                raw.push(4);
                raw.extend_from_slice(&u32::from(i).to_le_bytes());
            }
        }
        let row = RawRow::decode_nbc(&mut raw.as_slice(), &metadata).unwrap();
        assert_eq!(row.len(), 10);
        for i in 0..10 {
            assert_eq!(row.is_null(i), i == 1 || i == 9);
        }
        assert_eq!(row.values[8].as_deref(), Some(&8u32.to_le_bytes()[..]));
    }

    #[test]
    fn legacy_tokens_are_skipped() {
        let mut raw = vec![0xA4, 2, 0, 0xAA, 0xBB];
        raw.extend_from_slice(&[0x78, 1, 0, 2, 0]);
        raw.extend_from_slice(&[0xE4, 1, 0, 0, 0, 9]);
        Done::finished().encode(TokenType::Done, &mut raw);
        let mut parser = TokenParser::from_message(Bytes::from(raw));
        assert!(matches!(parser.next_token(None).unwrap(), Parsed::Token(Token::Done(_))));
        assert_eq!(parser.next_token(None).unwrap(), Parsed::Finished);
    }

    #[test]
    fn error_token_round_trip() {
        let message = ServerMessage {
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'nope'.".into(),
            server: "db01".into(),
            procedure: String::new(),
            line: 1,
        };
        let mut buf = Vec::new();
        message.encode(TokenType::Error, &mut buf).unwrap();
        let mut parser = TokenParser::from_message(Bytes::from(buf));
        assert_eq!(
            parser.next_token(None).unwrap(),
            Parsed::Token(Token::Error(message))
        );
    }

    #[test]
    fn env_changes_round_trip() {
        let changes = [
            EnvChange::Database {
                new: "sales".into(),
                old: "master".into(),
            },
            EnvChange::PacketSize { new: 8000, old: 4096 },
            EnvChange::BeginTransaction(0x0102_0304_0506_0708),
            EnvChange::CommitTransaction,
            EnvChange::ResetConnectionAck,
            EnvChange::Routing {
                host: "replica.local".into(),
                port: 11000,
            },
            EnvChange::Collation(Some(Collation::from_lcid(0x0409))),
        ];
        for change in changes {
            let mut buf = Vec::new();
            change.encode(&mut buf).unwrap();
            let mut parser = TokenParser::from_message(Bytes::from(buf));
            assert_eq!(
                parser.next_token(None).unwrap(),
                Parsed::Token(Token::EnvChange(change))
            );
        }
    }

    #[test]
    fn malformed_packet_size_is_rejected() {
        let mut body = vec![4u8, 3];
        body.extend_from_slice(&[b'a', 0, b'b', 0, b'c', 0]);
        body.push(0);
        let mut raw = vec![0xE3, body.len() as u8, 0];
        raw.extend_from_slice(&body);
        let mut parser = TokenParser::from_message(Bytes::from(raw));
        assert!(matches!(
            parser.next_token(None),
            Err(ProtocolError::InvalidEnvChange(_))
        ));
    }

    #[test]
    fn fed_auth_info_round_trip() {
        let info = FedAuthInfo {
            sts_url: "https://login.example/common".into(),
            spn: "https://database.example/".into(),
        };
        let mut buf = Vec::new();
        info.encode(&mut buf);
        let mut parser = TokenParser::from_message(Bytes::from(buf));
        assert_eq!(
            parser.next_token(None).unwrap(),
            Parsed::Token(Token::FedAuthInfo(info))
        );
    }

    #[test]
    fn login_ack_round_trip() {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            prog_version: [16, 0, 0x10, 0x00],
        };
        let mut buf = Vec::new();
        ack.encode(&mut buf).unwrap();
        assert_eq!(&buf[4..8], &[0x74, 0x00, 0x00, 0x04]);
        let mut parser = TokenParser::from_message(Bytes::from(buf));
        assert_eq!(parser.next_token(None).unwrap(), Parsed::Token(Token::LoginAck(ack)));
    }

    #[test]
    fn return_value_decodes_with_its_own_type_info() {
        let mut raw = vec![0xAC];
        raw.extend_from_slice(&1u16.to_le_bytes());
        write_b_varchar(&mut raw, "@out").unwrap();
        raw.push(0x01);
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(&[0x26, 8, 8]);
        raw.extend_from_slice(&7i64.to_le_bytes());
        let mut parser = TokenParser::from_message(Bytes::from(raw));
        match parser.next_token(None).unwrap() {
            Parsed::Token(Token::ReturnValue(rv)) => {
                assert_eq!(rv.name, "@out");
                assert_eq!(rv.ordinal, 1);
                assert_eq!(rv.type_info.type_id, TypeId::IntN);
                assert_eq!(rv.value.as_deref(), Some(&7i64.to_le_bytes()[..]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_with_error_and_attention_flags() {
        let mut raw = Vec::new();
        Done {
            status: DoneStatus::ERROR | DoneStatus::ATTN,
            cur_cmd: 0,
            row_count: 0,
        }
        .encode(TokenType::DoneProc, &mut raw);
        let mut parser = TokenParser::from_message(Bytes::from(raw));
        match parser.next_token(None).unwrap() {
            Parsed::Token(Token::DoneProc(done)) => {
                assert!(done.is_error());
                assert!(done.is_attention_ack());
                assert_eq!(done.rows(), None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
