//! Transaction manager requests (packet type 0x0E).
//!
//! Every request is `ALL_HEADERS`, a two-byte request type and a
//! request-specific body. Transaction names are B_VARCHAR; an empty name
//! addresses the innermost transaction.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_b_varchar;
use crate::error::ProtocolError;
use crate::sql_batch::write_all_headers;

/// Isolation level requested by BEGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Keep the session's current level.
    NoChange = 0x00,
    /// READ UNCOMMITTED.
    ReadUncommitted = 0x01,
    /// READ COMMITTED.
    #[default]
    ReadCommitted = 0x02,
    /// REPEATABLE READ.
    RepeatableRead = 0x03,
    /// SERIALIZABLE.
    Serializable = 0x04,
    /// SNAPSHOT.
    Snapshot = 0x05,
}

impl IsolationLevel {
    /// Text used in `SET TRANSACTION ISOLATION LEVEL`.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoChange | Self::ReadCommitted => "READ COMMITTED",
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

const TM_BEGIN_XACT: u16 = 5;
const TM_COMMIT_XACT: u16 = 7;
const TM_ROLLBACK_XACT: u16 = 8;
const TM_SAVE_XACT: u16 = 9;

/// A transaction manager request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    /// Start a transaction.
    Begin {
        /// Isolation level.
        isolation: IsolationLevel,
        /// Transaction name.
        name: String,
    },
    /// Commit, optionally starting a new transaction.
    Commit {
        /// Transaction name.
        name: String,
        /// Begin a new transaction with the same isolation afterwards.
        begin_new: bool,
    },
    /// Roll back to the start of the transaction or to a savepoint.
    Rollback {
        /// Transaction or savepoint name.
        name: String,
        /// Begin a new transaction afterwards.
        begin_new: bool,
    },
    /// Create a savepoint.
    Save {
        /// Savepoint name.
        name: String,
    },
}

impl TransactionRequest {
    /// Request type name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::Commit { .. } => "commit",
            Self::Rollback { .. } => "rollback",
            Self::Save { .. } => "save",
        }
    }

    /// Encode the message payload with the current transaction descriptor.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(64);
        write_all_headers(&mut buf, transaction_descriptor);
        match self {
            Self::Begin { isolation, name } => {
                buf.put_u16_le(TM_BEGIN_XACT);
                buf.put_u8(*isolation as u8);
                write_b_varchar(&mut buf, name)?;
            }
            Self::Commit { name, begin_new } => {
                buf.put_u16_le(TM_COMMIT_XACT);
                write_b_varchar(&mut buf, name)?;
                buf.put_u8(u8::from(*begin_new));
            }
            Self::Rollback { name, begin_new } => {
                buf.put_u16_le(TM_ROLLBACK_XACT);
                write_b_varchar(&mut buf, name)?;
                buf.put_u8(u8::from(*begin_new));
            }
            Self::Save { name } => {
                buf.put_u16_le(TM_SAVE_XACT);
                write_b_varchar(&mut buf, name)?;
            }
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sql_batch::ALL_HEADERS_SIZE;

    #[test]
    fn begin_carries_isolation_and_name() {
        let payload = TransactionRequest::Begin {
            isolation: IsolationLevel::Snapshot,
            name: "t1".into(),
        }
        .encode(0)
        .unwrap();
        assert_eq!(
            &payload[ALL_HEADERS_SIZE..],
            &[5, 0, 5, 2, b't', 0, b'1', 0]
        );
    }

    #[test]
    fn commit_uses_descriptor() {
        let payload = TransactionRequest::Commit {
            name: String::new(),
            begin_new: false,
        }
        .encode(0xAB)
        .unwrap();
        assert_eq!(payload[10], 0xAB);
        assert_eq!(&payload[ALL_HEADERS_SIZE..], &[7, 0, 0, 0]);
    }

    #[test]
    fn rollback_and_save() {
        let rollback = TransactionRequest::Rollback {
            name: "sp".into(),
            begin_new: true,
        }
        .encode(1)
        .unwrap();
        assert_eq!(&rollback[ALL_HEADERS_SIZE..], &[8, 0, 2, b's', 0, b'p', 0, 1]);

        let save = TransactionRequest::Save { name: "sp".into() }.encode(1).unwrap();
        assert_eq!(&save[ALL_HEADERS_SIZE..], &[9, 0, 2, b's', 0, b'p', 0]);
    }

    #[test]
    fn isolation_sql_text() {
        assert_eq!(IsolationLevel::default().as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }
}
