//! Authentication error types.

use thiserror::Error;

/// Errors raised by credential collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Credentials are unusable as given.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A token provider could not produce a token.
    #[error("failed to acquire token: {0}")]
    TokenAcquisition(String),

    /// An SSPI step failed.
    #[error("SSPI error: {0}")]
    Sspi(String),

    /// The server asked for a step the credentials cannot answer.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),
}
