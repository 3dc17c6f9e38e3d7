//! Client error types.

use mssql_codec::CodecError;
use tds_protocol::ServerMessage;
use thiserror::Error;

/// Server error numbers that may succeed when the login is retried.
///
/// 4060 (database unavailable), 10928 and 10929 (resource limits), 40197
/// (service error), 40501 (service busy) and 40613 (database unavailable).
pub const TRANSIENT_LOGIN_ERRORS: [i32; 6] = [4060, 10928, 10929, 40197, 40501, 40613];

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    Tls(#[from] mssql_tls::TlsError),

    /// The peer sent bytes that do not form valid TDS.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// Framing failure not covered by the other variants.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Value conversion or validation failure.
    #[error("type error: {0}")]
    Type(#[from] mssql_types::TypeError),

    /// Credential provider failure.
    #[error("authentication failed: {0}")]
    Authentication(#[from] mssql_auth::AuthError),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server returned an ERROR token.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number in the SQL batch or procedure.
        line: i32,
    },

    /// DONE reported an error but no ERROR token preceded it.
    #[error("command failed without explicit error token")]
    CommandFailed,

    /// `sp_prepare` completed without returning a statement handle.
    #[error("prepare returned no statement handle")]
    MissingHandle,

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The server did not acknowledge a cancel in time; the connection is closed.
    #[error("cancel timed out, connection closed")]
    CancelTimeout,

    /// The request timed out and was cancelled.
    #[error("request timed out")]
    RequestTimeout,

    /// Connecting took longer than the connect timeout.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Another request is still outstanding on this connection.
    #[error("a request is already in progress")]
    RequestInProgress,

    /// The connection is not in a state that accepts the operation.
    #[error("invalid connection state: {0}")]
    InvalidState(String),

    /// The caller broke an API contract.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The client and server encryption settings are incompatible.
    #[error("encryption not supported: {0}")]
    Encryption(String),

    /// SQL Browser lookup failed.
    #[error("instance lookup failed: {0}")]
    Browser(String),

    /// The server asked the client to reconnect elsewhere.
    #[error("routing required to {host}:{port}")]
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// Too many redirects during connection.
    #[error("too many redirects (max {max})")]
    TooManyRedirects {
        /// Maximum redirects allowed.
        max: u8,
    },
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Codec(other),
        }
    }
}

impl From<ServerMessage> for Error {
    fn from(msg: ServerMessage) -> Self {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message,
            server: non_empty(msg.server),
            procedure: non_empty(msg.procedure),
            line: msg.line,
        }
    }
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout | Self::RequestTimeout | Self::ConnectionClosed | Self::Io(_)
        ) || self.is_transient_server_error()
    }

    /// Server errors that a login retry may cure.
    #[must_use]
    pub fn is_transient_server_error(&self) -> bool {
        matches!(self, Self::Server { number, .. } if TRANSIENT_LOGIN_ERRORS.contains(number))
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Whether the connection is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Tls(_)
            | Self::Protocol(_)
            | Self::Codec(_)
            | Self::ConnectionClosed
            | Self::CancelTimeout => true,
            Self::Server { class, .. } => *class >= 20,
            _ => false,
        }
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn server(number: i32, class: u8) -> Error {
        Error::from(ServerMessage {
            number,
            state: 1,
            class,
            message: "boom".into(),
            server: String::new(),
            procedure: "p".into(),
            line: 3,
        })
    }

    #[test]
    fn server_message_conversion() {
        let Error::Server {
            server, procedure, line, ..
        } = server(50000, 16)
        else {
            unreachable!()
        };
        assert_eq!(server, None);
        assert_eq!(procedure.as_deref(), Some("p"));
        assert_eq!(line, 3);
    }

    #[test]
    fn transient_login_errors() {
        for number in TRANSIENT_LOGIN_ERRORS {
            assert!(server(number, 14).is_transient());
        }
        assert!(!server(18456, 14).is_transient());
        assert!(Error::ConnectTimeout.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn fatality() {
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::CancelTimeout.is_fatal());
        assert!(server(1, 20).is_fatal());
        assert!(!server(1, 16).is_fatal());
        assert!(!Error::CommandFailed.is_fatal());
        assert!(!Error::RequestInProgress.is_fatal());
        assert!(!Error::MissingHandle.is_fatal());
    }

    #[test]
    fn codec_errors_flatten() {
        assert!(matches!(Error::from(CodecError::ConnectionClosed), Error::ConnectionClosed));
        assert!(matches!(
            Error::from(CodecError::Io(std::io::Error::other("x"))),
            Error::Io(_)
        ));
        assert!(matches!(Error::from(CodecError::InvalidPacketSize(10)), Error::Codec(_)));
    }

    #[test]
    fn command_failed_message() {
        assert_eq!(
            Error::CommandFailed.to_string(),
            "command failed without explicit error token"
        );
    }
}
