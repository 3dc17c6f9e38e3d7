//! Credential types.

use std::borrow::Cow;
use std::sync::Arc;

use crate::provider::{SspiProvider, TokenProvider};

/// How a connection proves its identity.
///
/// Secrets are opaque to the client: passwords and tokens are copied into
/// the login request and never logged.
#[derive(Clone)]
#[non_exhaustive]
pub enum Credentials {
    /// SQL Server login name and password.
    SqlServer {
        /// Login name.
        username: Cow<'static, str>,
        /// Password.
        password: Cow<'static, str>,
    },

    /// Federated access token obtained by the caller, sent inline.
    AccessToken {
        /// The token.
        token: Cow<'static, str>,
    },

    /// Federated authentication with the token fetched after the server
    /// sends FEDAUTHINFO.
    FedAuth(Arc<dyn TokenProvider>),

    /// Integrated authentication through an SSPI implementation.
    Sspi(Arc<dyn SspiProvider>),
}

impl Credentials {
    /// SQL Server login.
    pub fn sql_server(username: impl Into<Cow<'static, str>>, password: impl Into<Cow<'static, str>>) -> Self {
        Self::SqlServer {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Inline federated access token.
    pub fn access_token(token: impl Into<Cow<'static, str>>) -> Self {
        Self::AccessToken { token: token.into() }
    }

    /// Federated authentication through `provider`.
    pub fn fed_auth(provider: impl TokenProvider + 'static) -> Self {
        Self::FedAuth(Arc::new(provider))
    }

    /// Integrated authentication through `provider`.
    pub fn sspi(provider: impl SspiProvider + 'static) -> Self {
        Self::Sspi(Arc::new(provider))
    }

    /// Whether these are SQL Server login credentials.
    #[must_use]
    pub fn is_sql_auth(&self) -> bool {
        matches!(self, Self::SqlServer { .. })
    }

    /// Whether login uses the FEDAUTH feature extension.
    #[must_use]
    pub fn is_federated(&self) -> bool {
        matches!(self, Self::AccessToken { .. } | Self::FedAuth(_))
    }

    /// Name of the authentication method, for logs.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::SqlServer { .. } => "SQL Server Authentication",
            Self::AccessToken { .. } => "Access Token",
            Self::FedAuth(_) => "Federated Authentication",
            Self::Sspi(_) => "Integrated Authentication",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::AccessToken { .. } => f
                .debug_struct("AccessToken")
                .field("token", &"[REDACTED]")
                .finish(),
            Self::FedAuth(provider) => f.debug_tuple("FedAuth").field(provider).finish(),
            Self::Sspi(provider) => f.debug_tuple("Sspi").field(provider).finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::StaticToken;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::sql_server("sa", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("sa"));
        assert!(!debug.contains("hunter2"));

        let token = Credentials::access_token("eyJ0eXAi");
        assert!(!format!("{token:?}").contains("eyJ0eXAi"));
    }

    #[test]
    fn test_method_classification() {
        assert!(Credentials::sql_server("u", "p").is_sql_auth());
        assert!(Credentials::access_token("t").is_federated());
        assert!(Credentials::fed_auth(StaticToken::new("t")).is_federated());
        assert_eq!(
            Credentials::fed_auth(StaticToken::new("t")).method_name(),
            "Federated Authentication"
        );
    }
}
