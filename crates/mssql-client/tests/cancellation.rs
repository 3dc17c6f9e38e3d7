//! Cancellation, request timeouts and abandoned requests.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use futures_util::FutureExt;
use mssql_client::{
    BulkColumn, BulkLoad, BulkOptions, Client, Collector, ConnectionState, Error, SqlValue, TimeoutConfig, TypeId,
    TypeInfo,
};
use mssql_testing::{MockColumn, MockResponse, MockTdsServer, Request};

use common::{config_for, connect, init_tracing};

const SLOW: &str = "SELECT n FROM slow_table";

/// One row, then a long wait before the rest of the result.
fn slow_response() -> MockResponse {
    MockResponse::new()
        .columns(vec![MockColumn::int("n")])
        .row(vec![SqlValue::Int(1)])
        .pause(Duration::from_secs(30))
        .row(vec![SqlValue::Int(2)])
        .done(2)
}

async fn slow_server() -> MockTdsServer {
    MockTdsServer::builder()
        .with_response(SLOW, slow_response())
        .with_response("SELECT 1", MockResponse::scalar(MockColumn::int("one"), SqlValue::Int(1)))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn cancel_mid_stream_then_reuse() {
    let server = slow_server().await;
    let mut client = connect(&server).await;

    let handle = client.cancel_handle().unwrap();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel().await.unwrap()
    });

    let mut collector = Collector::new();
    let err = client.execute_batch(SLOW, &mut collector).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
    assert!(canceller.await.unwrap(), "an attention should have been sent");
    assert!(collector.rows().count() <= 1);
    assert_eq!(client.state(), ConnectionState::LoggedIn);

    let mut collector = Collector::new();
    client.execute_batch("SELECT 1", &mut collector).await.unwrap();
    let values: Vec<i32> = collector.rows().map(|r| r.get(0).unwrap()).collect();
    assert_eq!(values, [1]);

    let attentions = server
        .requests()
        .await
        .iter()
        .filter(|r| matches!(r, Request::Attention))
        .count();
    assert_eq!(attentions, 1);
}

#[tokio::test]
async fn cancel_during_bulk_load_abandons_the_message() {
    init_tracing();
    let server = slow_server().await;
    let mut client = connect(&server).await;

    let mut bulk = BulkLoad::new("dbo.numbers", BulkOptions::new());
    bulk.add_column(BulkColumn::new("n", TypeInfo::new(TypeId::IntN).with_length(4)).nullable(false))
        .unwrap();

    // Cancel from inside the row source once several packets are on the wire.
    let handle = client.cancel_handle().unwrap();
    let rows = (0..20_000).map(move |n| {
        if n == 5_000 {
            let sent = handle.cancel().now_or_never().unwrap().unwrap();
            assert!(sent);
        }
        vec![SqlValue::Int(n)]
    });

    let err = client.bulk_load(&mut bulk, rows).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
    assert_eq!(client.state(), ConnectionState::LoggedIn);

    client.execute_batch("SELECT 1", &mut ()).await.unwrap();

    // The server discarded the partial load and saw exactly one Attention
    // after it, not interleaved with its packets.
    let requests = server.requests().await;
    assert!(!requests.iter().any(|r| matches!(r, Request::BulkLoad { .. })), "{requests:?}");
    let attentions = requests.iter().filter(|r| matches!(r, Request::Attention)).count();
    assert_eq!(attentions, 1);
    assert_eq!(requests.last().and_then(Request::sql), Some("SELECT 1"));
}

#[tokio::test]
async fn cancel_without_a_request_does_nothing() {
    let server = slow_server().await;
    let client = connect(&server).await;

    let handle = client.cancel_handle().unwrap();
    assert!(!handle.cancel().await.unwrap());
    assert!(!handle.is_pending());
    assert!(!server.requests().await.contains(&Request::Attention));
}

#[tokio::test]
async fn request_timeout_sends_attention() {
    init_tracing();
    let server = slow_server().await;
    let config = config_for(&server).request_timeout(Some(Duration::from_millis(200)));
    let mut client = Client::connect(config).await.unwrap();

    let err = client.execute_batch(SLOW, &mut ()).await.unwrap_err();
    assert!(matches!(err, Error::RequestTimeout), "{err:?}");
    assert!(err.is_transient());
    assert_eq!(client.state(), ConnectionState::LoggedIn);
    assert!(server.requests().await.contains(&Request::Attention));

    client.execute_batch("SELECT 1", &mut ()).await.unwrap();
}

#[tokio::test]
async fn unacknowledged_attention_closes_the_connection() {
    init_tracing();
    let server = MockTdsServer::builder()
        .with_response(
            SLOW,
            MockResponse::new()
                .columns(vec![MockColumn::int("n")])
                .pause(Duration::from_secs(2))
                .done(0),
        )
        .ignore_attention()
        .build()
        .await
        .unwrap();
    let timeouts = TimeoutConfig::new()
        .request_timeout(Some(Duration::from_millis(100)))
        .cancel_timeout(Duration::from_millis(200));
    let mut client = Client::connect(config_for(&server).timeouts(timeouts)).await.unwrap();

    let err = client.execute_batch(SLOW, &mut ()).await.unwrap_err();
    assert!(matches!(err, Error::CancelTimeout), "{err:?}");
    assert!(err.is_fatal());
    assert_eq!(client.state(), ConnectionState::Final);
    assert!(matches!(
        client.execute_batch("SELECT 1", &mut ()).await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn abandoned_request_blocks_the_connection() {
    let server = slow_server().await;
    let mut client = connect(&server).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(100), client.execute_batch(SLOW, &mut ())).await;
    assert!(abandoned.is_err(), "the slow request should still be running");
    assert_eq!(client.state(), ConnectionState::SentClientRequest);

    let err = client.execute_batch("SELECT 1", &mut ()).await.unwrap_err();
    assert!(matches!(err, Error::RequestInProgress));
    assert!(matches!(client.reset().await, Err(Error::RequestInProgress)));

    client.close();
    assert_eq!(client.state(), ConnectionState::Final);
}
