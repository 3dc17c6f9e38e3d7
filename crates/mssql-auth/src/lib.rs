//! # mssql-auth
//!
//! Credentials for SQL Server connections.
//!
//! | Method | Wire flow |
//! |--------|-----------|
//! | SQL Server login | username and obfuscated password in LOGIN7 |
//! | Access token | FEDAUTH feature extension carrying the token |
//! | Federated provider | FEDAUTH extension, then FEDAUTHINFO → FEDAUTH_TOKEN message |
//! | Integrated (SSPI) | first blob in LOGIN7, further legs in SSPI messages |
//!
//! Token acquisition and SSPI are supplied by the caller through
//! [`TokenProvider`] and [`SspiProvider`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod provider;

pub use credentials::Credentials;
pub use error::AuthError;
pub use provider::{FedAuthRequest, SspiContext, SspiProvider, StaticToken, TokenProvider};
