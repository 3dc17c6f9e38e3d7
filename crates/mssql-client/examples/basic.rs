//! Connect, stream a result set and run a parameterized statement inside a
//! transaction.
//!
//! # Running
//!
//! ```bash
//! export MSSQL_HOST=localhost
//! export MSSQL_DATABASE=testdb
//! export MSSQL_USER=sa
//! export MSSQL_PASSWORD=YourStrong@Passw0rd
//! # Set MSSQL_ENCRYPT=false for development servers without TLS configured
//!
//! RUST_LOG=mssql_client=debug cargo run --example basic
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use mssql_client::{Client, Collector, Config, Error, IsolationLevel, Parameter, ResponseHandler, Row, SqlValue};
use tds_protocol::token::{ColMetaData, ServerMessage};

/// Prints rows as they arrive instead of collecting them.
struct Printer;

impl ResponseHandler for Printer {
    fn on_metadata(&mut self, columns: &Arc<ColMetaData>) {
        let names: Vec<&str> = columns.columns.iter().map(|c| c.name.as_str()).collect();
        println!("{}", names.join(" | "));
    }

    fn on_row(&mut self, row: Row) {
        println!("{:?}", row.values());
    }

    fn on_info(&mut self, message: &ServerMessage) {
        println!("info {}: {}", message.number, message.message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = std::env::var("MSSQL_HOST").unwrap_or_else(|_| "localhost".into());
    let database = std::env::var("MSSQL_DATABASE").unwrap_or_else(|_| "master".into());
    let user = std::env::var("MSSQL_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| "Password123!".into());
    let encrypt = std::env::var("MSSQL_ENCRYPT").unwrap_or_else(|_| "true".into());

    let config = Config::from_connection_string(&format!(
        "Server={host};Database={database};User Id={user};Password={password};TrustServerCertificate=true;Encrypt={encrypt}"
    ))?;

    println!("Connecting to {host}...");
    let mut client = Client::connect(config).await?;
    println!(
        "Connected to {} {}",
        client.session().server_name().unwrap_or("SQL Server"),
        client.session().server_version().unwrap_or_default()
    );

    client
        .execute_batch("SELECT name, database_id FROM sys.databases ORDER BY database_id", &mut Printer)
        .await?;

    client
        .execute_batch("CREATE TABLE #visits (id int IDENTITY, page nvarchar(100))", &mut ())
        .await?;

    client.begin_transaction("", IsolationLevel::ReadCommitted).await?;
    for page in ["/", "/about", "/contact"] {
        client
            .execute_parameterized(
                "INSERT INTO #visits (page) VALUES (@page)",
                &[Parameter::new("page", SqlValue::String(page.into()))],
                &mut (),
            )
            .await?;
    }
    client.commit("").await?;

    let mut collector = Collector::new();
    client
        .execute_parameterized(
            "SELECT COUNT(*) FROM #visits WHERE page LIKE @prefix",
            &[Parameter::new("prefix", SqlValue::String("/%".into()))],
            &mut collector,
        )
        .await?;
    for row in collector.rows() {
        let count: i32 = row.get(0)?;
        println!("{count} visits");
    }

    client.close();
    Ok(())
}
