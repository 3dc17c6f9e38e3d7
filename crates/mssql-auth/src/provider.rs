//! Collaborator traits for multi-step authentication.
//!
//! The client never implements an authentication protocol itself. SSPI
//! (NTLM/Kerberos) blobs and federated tokens are produced by these
//! collaborators and carried verbatim on the wire.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AuthError;

/// What the server asked for in its FEDAUTHINFO token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FedAuthRequest {
    /// Token endpoint.
    pub sts_url: String,
    /// Resource the token is for.
    pub spn: String,
}

/// Produces federated authentication tokens on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// Workflow byte sent in the FEDAUTH feature extension.
    fn workflow(&self) -> u8 {
        0x03
    }

    /// Obtain an access token for `request`.
    async fn token(&self, request: &FedAuthRequest) -> Result<String, AuthError>;
}

/// Token provider returning a fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Provider answering every request with `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, request: &FedAuthRequest) -> Result<String, AuthError> {
        tracing::debug!(spn = %request.spn, "using static federated token");
        Ok(self.0.clone())
    }
}

/// Starts SSPI exchanges, one per login attempt.
pub trait SspiProvider: Send + Sync + fmt::Debug {
    /// Begin an exchange with the service principal `spn`.
    fn begin(&self, spn: &str) -> Result<Box<dyn SspiContext>, AuthError>;
}

/// State of one SSPI exchange.
#[async_trait]
pub trait SspiContext: Send {
    /// Produce the next blob. `challenge` is `None` for the first leg, whose
    /// blob travels in LOGIN7; later blobs answer the server's SSPI tokens.
    async fn step(&mut self, challenge: Option<&[u8]>) -> Result<Bytes, AuthError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("secret");
        let token = provider.token(&FedAuthRequest::default()).await.unwrap();
        assert_eq!(token, "secret");
        assert_eq!(provider.workflow(), 0x03);
        assert!(!format!("{provider:?}").contains("secret"));
    }
}
