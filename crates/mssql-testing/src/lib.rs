//! # mssql-testing
//!
//! Test infrastructure for the SQL Server client crates.
//!
//! [`MockTdsServer`] accepts real TCP connections, performs the PRELOGIN
//! and LOGIN7 exchange without TLS and answers requests from a script of
//! [`MockResponse`]s. Every request it decodes is recorded as a
//! [`Request`] for later inspection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockColumn, MockResponse, MockTdsServer};
//! use mssql_types::SqlValue;
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response(
//!             "SELECT id, name FROM users",
//!             MockResponse::rows(
//!                 vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
//!                 vec![vec![SqlValue::Int(1), SqlValue::String("Alice".into())]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Point a client at server.host():server.port() with encryption off.
//! }
//! ```
//!
//! Responses may pause part way with [`MockResponse::pause`]; an Attention
//! received during a pause ends the response with an acknowledgement, which
//! is how cancellation is exercised.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
pub mod response;

pub use mock_server::{
    MockServerBuilder, MockServerConfig, MockServerError, MockTdsServer, RecordedParam, Request, TransactionKind,
};
pub use response::{MockColumn, MockResponse};
