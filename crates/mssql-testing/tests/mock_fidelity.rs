//! Wire-level tests for the mock TDS server.
//!
//! These drive the server with hand-built messages so the mock can be
//! trusted independently of the client crate.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use mssql_testing::{MockColumn, MockResponse, MockTdsServer, Request, TransactionKind};
use mssql_types::{SqlValue, ValueMeta, decode_value};
use tds_protocol::{
    EncryptionLevel, EnvChange, IsolationLevel, Login7, Message, PacketStatus, PacketType, Parsed, PreLogin,
    Reassembler, RpcParam, RpcRequest, SqlBatch, Token, TokenParser, TransactionRequest, frame,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct WireClient {
    stream: TcpStream,
    reassembler: Reassembler,
}

impl WireClient {
    async fn connect(server: &MockTdsServer) -> Self {
        Self {
            stream: TcpStream::connect(server.addr()).await.unwrap(),
            reassembler: Reassembler::default(),
        }
    }

    async fn send(&mut self, packet_type: PacketType, payload: Bytes) {
        self.send_with(packet_type, payload, PacketStatus::NORMAL).await;
    }

    async fn send_with(&mut self, packet_type: PacketType, payload: Bytes, status: PacketStatus) {
        let mut out = BytesMut::new();
        for packet in frame(packet_type, payload, 4096, status) {
            packet.encode(&mut out);
        }
        self.stream.write_all(&out).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(message) = self.reassembler.next_message().unwrap() {
                return message;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
            self.reassembler.extend_from_slice(&buf[..n]);
        }
    }

    async fn tokens(&mut self) -> Vec<Token> {
        let message = self.recv().await;
        assert_eq!(message.packet_type, PacketType::TabularResult);
        let mut parser = TokenParser::from_message(message.payload);
        let mut metadata = None;
        let mut tokens = Vec::new();
        loop {
            match parser.next_token(metadata.as_deref()).unwrap() {
                Parsed::Token(Token::ColMetaData(columns)) => {
                    metadata = Some(columns.clone());
                    tokens.push(Token::ColMetaData(columns));
                }
                Parsed::Token(token) => tokens.push(token),
                Parsed::Finished => return tokens,
                Parsed::NeedMoreData => panic!("truncated message"),
            }
        }
    }

    async fn login(server: &MockTdsServer) -> (Self, Vec<Token>) {
        let mut client = Self::connect(server).await;
        client
            .send(PacketType::PreLogin, PreLogin::new(EncryptionLevel::NotSupported).encode())
            .await;
        let reply = client.recv().await;
        let prelogin = PreLogin::decode(&reply.payload).unwrap();
        assert_eq!(prelogin.encryption, EncryptionLevel::NotSupported);

        let login = Login7::new().with_app_name("wire-test").encode().unwrap();
        client.send(PacketType::Tds7Login, login).await;
        let tokens = client.tokens().await;
        (client, tokens)
    }
}

#[tokio::test]
async fn login_reports_database_and_server() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .build()
        .await
        .unwrap();

    let (_client, tokens) = WireClient::login(&server).await;
    assert!(tokens.iter().any(|t| matches!(
        t,
        Token::EnvChange(EnvChange::Database { new, .. }) if new == "testdb"
    )));
    assert!(tokens.iter().any(|t| matches!(t, Token::LoginAck(ack) if ack.prog_name == "FidelityTest")));
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if !done.is_error()));
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn refused_logins_then_success() {
    let server = MockTdsServer::builder()
        .with_login_failures(40613, "Database is not currently available.", 1)
        .build()
        .await
        .unwrap();

    let (_first, tokens) = WireClient::login(&server).await;
    assert!(matches!(&tokens[0], Token::Error(e) if e.number == 40613));
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.is_error()));

    let (_second, tokens) = WireClient::login(&server).await;
    assert!(tokens.iter().any(|t| matches!(t, Token::LoginAck(_))));
}

#[tokio::test]
async fn routing_follows_login_ack() {
    let server = MockTdsServer::builder().with_routing("replica.local", 1444).build().await.unwrap();
    let (_client, tokens) = WireClient::login(&server).await;
    assert!(tokens.iter().any(|t| matches!(
        t,
        Token::EnvChange(EnvChange::Routing { host, port: 1444 }) if host == "replica.local"
    )));
}

#[tokio::test]
async fn scripted_batch_is_answered_and_recorded() {
    let server = MockTdsServer::builder()
        .with_response(
            "select name from users",
            MockResponse::rows(
                vec![MockColumn::nvarchar("name", 50)],
                vec![
                    vec![SqlValue::String("alice".into())],
                    vec![SqlValue::String("bob".into())],
                ],
            ),
        )
        .build()
        .await
        .unwrap();

    let (mut client, _) = WireClient::login(&server).await;
    client
        .send(PacketType::SqlBatch, SqlBatch::new("  SELECT name FROM users ").encode())
        .await;
    let tokens = client.tokens().await;
    assert!(matches!(&tokens[0], Token::ColMetaData(m) if m.columns[0].name == "name"));
    assert_eq!(tokens.iter().filter(|t| matches!(t, Token::Row(_))).count(), 2);
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.row_count == 2));

    client.send(PacketType::SqlBatch, SqlBatch::new("SELECT 1").encode()).await;
    let tokens = client.tokens().await;
    assert_eq!(tokens.len(), 1, "unscripted batches get the default response");

    let requests = server.requests().await;
    assert_eq!(requests[0].sql(), Some("  SELECT name FROM users "));
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn reset_flag_is_acknowledged() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let (mut client, _) = WireClient::login(&server).await;
    client
        .send_with(
            PacketType::SqlBatch,
            SqlBatch::new("SET ANSI_NULLS ON").encode(),
            PacketStatus::RESET_CONNECTION,
        )
        .await;
    let tokens = client.tokens().await;
    assert!(matches!(tokens[0], Token::EnvChange(EnvChange::ResetConnectionAck)));
    assert!(matches!(
        &server.requests().await[0],
        Request::SqlBatch { reset: true, .. }
    ));
}

#[tokio::test]
async fn prepared_handles_live_until_unprepared_or_reset() {
    let server = MockTdsServer::builder()
        .with_response("SELECT @n", MockResponse::scalar(MockColumn::int("n"), SqlValue::Int(5)))
        .build()
        .await
        .unwrap();
    let (mut client, _) = WireClient::login(&server).await;

    client
        .send(PacketType::Rpc, RpcRequest::prepare("SELECT @n", "@n int").encode().unwrap())
        .await;
    let tokens = client.tokens().await;
    let Some(Token::ReturnValue(rv)) = tokens.iter().find(|t| matches!(t, Token::ReturnValue(_))) else {
        panic!("expected a handle, got {tokens:?}");
    };
    let SqlValue::Int(handle) = decode_value(rv.value.clone(), &ValueMeta::new(&rv.type_info)).unwrap() else {
        panic!("handle is not an int");
    };
    assert!(matches!(tokens.last(), Some(Token::DoneProc(done)) if !done.is_error()));

    let execute = RpcRequest::execute(handle, vec![RpcParam::int("", Some(5))]);
    client.send(PacketType::Rpc, execute.encode().unwrap()).await;
    let tokens = client.tokens().await;
    assert!(tokens.iter().any(|t| matches!(t, Token::Row(_))), "{tokens:?}");

    client
        .send_with(PacketType::SqlBatch, SqlBatch::new("SELECT 1").encode(), PacketStatus::RESET_CONNECTION)
        .await;
    client.tokens().await;
    client.send(PacketType::Rpc, execute.encode().unwrap()).await;
    let tokens = client.tokens().await;
    assert!(matches!(&tokens[0], Token::Error(e) if e.number == 8179));

    client
        .send(PacketType::Rpc, RpcRequest::unprepare(handle).encode().unwrap())
        .await;
    let tokens = client.tokens().await;
    assert!(matches!(&tokens[0], Token::Error(e) if e.number == 8179));
}

#[tokio::test]
async fn transaction_manager_tracks_descriptor() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let (mut client, _) = WireClient::login(&server).await;

    let commit = TransactionRequest::Commit {
        name: String::new(),
        begin_new: false,
    };
    client
        .send(PacketType::TransactionManager, commit.encode(0).unwrap())
        .await;
    let tokens = client.tokens().await;
    assert!(matches!(&tokens[0], Token::Error(e) if e.number == 3902));

    let begin = TransactionRequest::Begin {
        isolation: IsolationLevel::Serializable,
        name: "t1".into(),
    };
    client.send(PacketType::TransactionManager, begin.encode(0).unwrap()).await;
    let tokens = client.tokens().await;
    let Token::EnvChange(EnvChange::BeginTransaction(descriptor)) = tokens[0] else {
        panic!("expected a transaction descriptor, got {tokens:?}");
    };
    assert_ne!(descriptor, 0);

    client
        .send(PacketType::TransactionManager, commit.encode(descriptor).unwrap())
        .await;
    let tokens = client.tokens().await;
    assert!(matches!(tokens[0], Token::EnvChange(EnvChange::CommitTransaction)));

    let requests = server.requests().await;
    assert!(matches!(
        &requests[1],
        Request::Transaction { kind: TransactionKind::Begin(4), name, transaction: 0 } if name == "t1"
    ));
    assert!(matches!(
        &requests[2],
        Request::Transaction { kind: TransactionKind::Commit, transaction, .. } if *transaction == descriptor
    ));
}

#[tokio::test]
async fn attention_during_pause_ends_the_response() {
    let server = MockTdsServer::builder()
        .with_response(
            "WAITFOR DELAY '00:01:00'",
            MockResponse::new()
                .columns(vec![MockColumn::int("n")])
                .row(vec![SqlValue::Int(1)])
                .pause(Duration::from_secs(60))
                .row(vec![SqlValue::Int(2)])
                .done(2),
        )
        .build()
        .await
        .unwrap();

    let (mut client, _) = WireClient::login(&server).await;
    client
        .send(PacketType::SqlBatch, SqlBatch::new("WAITFOR DELAY '00:01:00'").encode())
        .await;
    client.send(PacketType::Attention, Bytes::new()).await;

    let tokens = client.tokens().await;
    assert_eq!(tokens.iter().filter(|t| matches!(t, Token::Row(_))).count(), 1);
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.is_attention_ack()));
    assert_eq!(server.requests().await.last(), Some(&Request::Attention));
}
