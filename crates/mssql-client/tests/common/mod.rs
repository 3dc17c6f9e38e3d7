//! Shared helpers for tests that run against the mock TDS server.

#![allow(dead_code)]

use std::time::Duration;

use mssql_client::{Client, Config, Credentials, EncryptionLevel, RetryPolicy};
use mssql_testing::{MockTdsServer, Request};

/// Route client logs through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plain-text configuration pointed at `server`.
pub fn config_for(server: &MockTdsServer) -> Config {
    Config::new()
        .host(server.host())
        .port(server.port())
        .credentials(Credentials::sql_server("sa", "Password123"))
        .encrypt(EncryptionLevel::NotSupported)
        .connect_timeout(Duration::from_secs(5))
        .retry(RetryPolicy::no_retry())
}

pub async fn connect(server: &MockTdsServer) -> Client {
    init_tracing();
    Client::connect(config_for(server)).await.unwrap()
}

/// Requests after the session options batch sent at login.
pub async fn requests_after_login(server: &MockTdsServer) -> Vec<Request> {
    server.requests().await.into_iter().skip(1).collect()
}
