//! TLS error types.

use thiserror::Error;

/// Errors raised while establishing TLS.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// The handshake did not complete.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// A configured root certificate was rejected.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The host cannot be used as a TLS server name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// The rustls configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Socket failure during the handshake.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by rustls.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
