//! # mssql-tls
//!
//! TLS for TDS connections, delegated to rustls.
//!
//! TDS 7.x negotiates encryption in the cleartext PRELOGIN exchange and then
//! runs the TLS handshake inside PRELOGIN packets:
//!
//! ```text
//! TCP connect → PRELOGIN (cleartext) → TLS handshake in PRELOGIN packets → LOGIN7 (encrypted)
//! ```
//!
//! When only the login is to be encrypted, the caller unwraps the plain
//! socket again after LOGIN7 with `tls.into_inner().0.into_inner()`.
//!
//! Server certificates are validated against the Mozilla roots unless
//! `trust_server_certificate` is set, which logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;

pub use config::{TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;

pub use tokio_rustls::client::TlsStream;
