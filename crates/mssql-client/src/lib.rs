//! # mssql-client
//!
//! Async SQL Server client: connection state machine, request execution,
//! response dispatch, cancellation and bulk load.
//!
//! ## Connection lifecycle
//!
//! A [`Client`] moves through the states of [`ConnectionState`]:
//!
//! ```text
//! Initialized -> Connecting -> SentPreLogin -> [SentTlsNegotiation] -> SentLogin
//!     -> LoggedInSendingInitialSql -> LoggedIn <-> SentClientRequest [-> SentAttention]
//! SentLogin -> TransientFailureRetry | Rerouting -> Connecting
//! any -> Final
//! ```
//!
//! Responses are pushed to a [`ResponseHandler`] token by token; a
//! [`Collector`] keeps everything in memory for callers that prefer that.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_client::{Client, Collector, Config, Parameter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "Server=localhost;Database=test;User Id=sa;Password=Password123;",
//!     )?;
//!     let mut client = Client::connect(config).await?;
//!
//!     let mut rows = Collector::new();
//!     client
//!         .execute_parameterized(
//!             "SELECT name FROM users WHERE id = @id",
//!             &[Parameter::new("id", 1i32.into())],
//!             &mut rows,
//!         )
//!         .await?;
//!     for row in rows.rows() {
//!         let name: String = row.get(0)?;
//!         println!("user: {name}");
//!     }
//!
//!     client.begin_transaction("", mssql_client::IsolationLevel::ReadCommitted).await?;
//!     client.execute_batch("UPDATE users SET active = 1", &mut ()).await?;
//!     client.commit("").await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod browser;
pub mod bulk;
mod cancel;
pub mod client;
pub mod config;
pub mod error;
mod login;
pub mod param;
pub mod prepared;
pub mod response;
pub mod state;

pub use browser::BROWSER_PORT;
pub use bulk::{BulkColumn, BulkLoad, BulkOptions, BulkPayload, BulkRow, SortOrder};
pub use cancel::CancelHandle;
pub use client::Client;
pub use config::{Config, DEFAULT_PORT, RedirectConfig, RetryPolicy, SessionOptions, TimeoutConfig};
pub use error::{Error, Result, TRANSIENT_LOGIN_ERRORS};
pub use mssql_auth::Credentials;
pub use mssql_types::{DateTimePolicy, FromSql, Numeric, Row, SqlValue, ToSql};
pub use param::Parameter;
pub use prepared::PreparedHandle;
pub use response::{Collector, OutputParameter, RequestOutcome, ResponseHandler, ResultSet};
pub use state::{ConnectionState, LoginMethod, SessionState};
pub use tds_protocol::{EncryptionLevel, IsolationLevel, TdsVersion, TypeId, TypeInfo};
