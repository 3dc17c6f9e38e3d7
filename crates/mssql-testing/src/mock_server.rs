//! Mock TDS server for connection-level tests.
//!
//! The server speaks plain TDS over TCP (it answers PRELOGIN with
//! encryption not supported), logs the client in and then answers each
//! request from its script. Every decoded request is recorded so tests can
//! check what went over the wire.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockColumn, MockResponse, MockTdsServer};
//!
//! let server = MockTdsServer::builder()
//!     .with_response("SELECT 42", MockResponse::scalar(MockColumn::int("n"), SqlValue::Int(42)))
//!     .build()
//!     .await?;
//! // Connect a client to server.host() / server.port() with encryption off.
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use mssql_types::{DateTimePolicy, Row, SqlValue, ValueMeta, decode_value};
use tds_protocol::codec::{ensure, read_b_varchar, read_utf16};
use tds_protocol::{
    ColMetaData, DEFAULT_PACKET_SIZE, Done, DoneStatus, EncryptionLevel, EnvChange, IsolationLevel, LoginAck,
    Message, PacketStatus, PacketType, Parsed, PreLogin, ProcId, ProtocolError, Reassembler, TdsVersion, Token,
    TokenParser, TokenType, TypeId, TypeInfo, frame,
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::response::{MockResponse, Step};

const TM_BEGIN_XACT: u16 = 5;
const TM_COMMIT_XACT: u16 = 7;
const TM_ROLLBACK_XACT: u16 = 8;
const TM_SAVE_XACT: u16 = 9;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the mock cannot decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The client sent a message out of order.
    #[error("unexpected {0:?} message")]
    Unexpected(PacketType),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// An RPC parameter as the server decoded it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedParam {
    /// Name including `@`, empty when positional.
    pub name: String,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Decoded value.
    pub value: SqlValue,
    /// Whether the parameter was passed by reference.
    pub output: bool,
}

/// Transaction manager request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// BEGIN TRANSACTION with the requested isolation level byte.
    Begin(u8),
    /// COMMIT.
    Commit,
    /// ROLLBACK.
    Rollback,
    /// SAVE TRANSACTION.
    Save,
}

/// A request received by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// SQL batch.
    SqlBatch {
        /// Batch text.
        sql: String,
        /// Transaction descriptor from ALL_HEADERS.
        transaction: u64,
        /// Whether the first packet asked for a connection reset.
        reset: bool,
    },
    /// Remote procedure call.
    Rpc {
        /// Procedure name; well-known ids are reported by name.
        procedure: String,
        /// Parameters in order.
        params: Vec<RecordedParam>,
        /// Transaction descriptor from ALL_HEADERS.
        transaction: u64,
    },
    /// Transaction manager request.
    Transaction {
        /// Request kind.
        kind: TransactionKind,
        /// Transaction or savepoint name.
        name: String,
        /// Transaction descriptor from ALL_HEADERS.
        transaction: u64,
    },
    /// Bulk load data.
    BulkLoad {
        /// Column names from COLMETADATA.
        columns: Vec<String>,
        /// Decoded rows.
        rows: Vec<Vec<SqlValue>>,
    },
    /// Attention signal.
    Attention,
}

impl Request {
    /// Batch text, for SQL batches.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::SqlBatch { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// Configuration for the mock TDS server.
#[derive(Debug)]
pub struct MockServerConfig {
    responses: HashMap<String, MockResponse>,
    procedures: HashMap<String, MockResponse>,
    default_response: MockResponse,
    server_name: String,
    database: String,
    login_failure: Option<(i32, String)>,
    login_failures: usize,
    routing: Option<(String, u16)>,
    acknowledge_attention: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            procedures: HashMap::new(),
            default_response: MockResponse::empty(),
            server_name: "MockSQLServer".into(),
            database: "master".into(),
            login_failure: None,
            login_failures: 0,
            routing: None,
            acknowledge_attention: true,
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Builder for [`MockTdsServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a SQL batch, or an `sp_executesql` call, whose text matches
    /// `sql` ignoring case and surrounding whitespace.
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(sql.as_ref()), response);
        self
    }

    /// Answer calls to the procedure `name`.
    ///
    /// Scripting `sp_prepare` replaces the built-in handle allocation.
    pub fn with_procedure(mut self, name: impl AsRef<str>, response: MockResponse) -> Self {
        self.config.procedures.insert(normalize(name.as_ref()), response);
        self
    }

    /// Answer for requests without a scripted response.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Server name reported in LOGINACK.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Database reported after login.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Fail the first `count` logins with server error `number`.
    pub fn with_login_failures(mut self, number: i32, message: impl Into<String>, count: usize) -> Self {
        self.config.login_failure = Some((number, message.into()));
        self.config.login_failures = count;
        self
    }

    /// Accept logins but route every client to `host:port`.
    pub fn with_routing(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.routing = Some((host.into(), port));
        self
    }

    /// Never acknowledge Attention packets.
    pub fn ignore_attention(mut self) -> Self {
        self.config.acknowledge_attention = false;
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

struct Shared {
    config: MockServerConfig,
    requests: Mutex<Vec<Request>>,
    logins: AtomicUsize,
    connections: AtomicUsize,
    next_transaction: AtomicUsize,
}

impl Shared {
    async fn record(&self, request: Request) {
        tracing::trace!(?request, "mock server received request");
        self.requests.lock().await.push(request);
    }
}

/// A mock TDS server listening on localhost.
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl fmt::Debug for MockTdsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTdsServer").field("addr", &self.addr).finish_non_exhaustive()
    }
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            requests: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            next_transaction: AtomicUsize::new(1),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            let shared = Arc::clone(&accept_shared);
                            tokio::spawn(async move {
                                shared.connections.fetch_add(1, Ordering::SeqCst);
                                if let Err(e) = serve(stream, Arc::clone(&shared)).await {
                                    tracing::debug!(%peer, error = %e, "mock connection ended");
                                }
                                shared.connections.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            shared,
        })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for a client configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// LOGIN7 messages received so far.
    pub fn login_count(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub async fn requests(&self) -> Vec<Request> {
        self.shared.requests.lock().await.clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_messages(read, tx));

    let mut connection = ServerConnection {
        write,
        rx,
        pending: VecDeque::new(),
        shared,
        transaction: 0,
        savepoints: Vec::new(),
        prepared: HashMap::new(),
        next_handle: 1,
    };
    let result = connection.run().await;
    reader.abort();
    result
}

fn string_param(params: &[RecordedParam], index: usize) -> String {
    match params.get(index) {
        Some(RecordedParam {
            value: SqlValue::String(s),
            ..
        }) => s.clone(),
        _ => String::new(),
    }
}

/// The leading `int` handle of `sp_execute` and `sp_unprepare`.
fn int_param(params: &[RecordedParam]) -> i32 {
    match params.first() {
        Some(RecordedParam {
            value: SqlValue::Int(handle),
            ..
        }) => *handle,
        _ => 0,
    }
}

fn unknown_handle(handle: i32) -> MockResponse {
    MockResponse::error(8179, format!("Could not find prepared statement with handle {handle}."))
}

async fn read_messages(mut read: OwnedReadHalf, tx: mpsc::UnboundedSender<Result<Message>>) {
    let mut reassembler = Reassembler::default();
    let mut buf = vec![0u8; 8192];
    loop {
        loop {
            match reassembler.next_message() {
                Ok(Some(message)) => {
                    if tx.send(Ok(message)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    return;
                }
            }
        }
        match read.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => reassembler.extend_from_slice(&buf[..n]),
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return;
            }
        }
    }
}

struct ServerConnection {
    write: OwnedWriteHalf,
    rx: mpsc::UnboundedReceiver<Result<Message>>,
    pending: VecDeque<Message>,
    shared: Arc<Shared>,
    transaction: u64,
    savepoints: Vec<String>,
    /// Statements registered through `sp_prepare`, by handle.
    prepared: HashMap<i32, String>,
    next_handle: i32,
}

impl ServerConnection {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        self.rx.recv().await.transpose()
    }

    async fn run(&mut self) -> Result<()> {
        let Some(prelogin) = self.next_message().await? else {
            return Ok(());
        };
        if prelogin.packet_type != PacketType::PreLogin {
            return Err(MockServerError::Unexpected(prelogin.packet_type));
        }
        PreLogin::decode(&prelogin.payload)?;
        let reply = PreLogin::new(EncryptionLevel::NotSupported).encode();
        self.send(PacketType::TabularResult, reply).await?;

        let Some(login) = self.next_message().await? else {
            return Ok(());
        };
        if login.packet_type != PacketType::Tds7Login {
            return Err(MockServerError::Unexpected(login.packet_type));
        }
        if !self.login().await? {
            return Ok(());
        }

        while let Some(message) = self.next_message().await? {
            self.handle(message).await?;
        }
        Ok(())
    }

    /// Answer LOGIN7; `false` when the login was refused or rerouted.
    async fn login(&mut self) -> Result<bool> {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        let attempt = self.shared.logins.fetch_add(1, Ordering::SeqCst);

        if let Some((number, message)) = &config.login_failure {
            if attempt < config.login_failures {
                tracing::debug!(number, attempt, "refusing login");
                let response = MockResponse::new().error_token(*number, 14, message.clone()).done_error();
                self.respond(response).await?;
                return Ok(false);
            }
        }

        let mut response = MockResponse::new()
            .env_change(EnvChange::Database {
                new: config.database.clone(),
                old: "master".into(),
            })
            .env_change(EnvChange::PacketSize {
                new: DEFAULT_PACKET_SIZE as u32,
                old: DEFAULT_PACKET_SIZE as u32,
            });
        let mut ack = BytesMut::new();
        LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: config.server_name.clone(),
            prog_version: [16, 0, 0x10, 0x00],
        }
        .encode(&mut ack)?;
        response = response.raw(&ack);

        let routed = config.routing.clone();
        if let Some((host, port)) = &routed {
            response = response.env_change(EnvChange::Routing {
                host: host.clone(),
                port: *port,
            });
        }
        self.respond(response.done_status(DoneStatus::empty(), 0)).await?;
        Ok(routed.is_none())
    }

    async fn handle(&mut self, message: Message) -> Result<()> {
        match message.packet_type {
            PacketType::SqlBatch => self.sql_batch(message).await,
            PacketType::Rpc => self.rpc(message).await,
            PacketType::TransactionManager => self.transaction_request(message).await,
            PacketType::BulkLoad => self.bulk_load(message).await,
            PacketType::Attention => {
                self.shared.record(Request::Attention).await;
                if self.shared.config.acknowledge_attention {
                    self.send(PacketType::TabularResult, attention_ack()).await?;
                }
                Ok(())
            }
            other => Err(MockServerError::Unexpected(other)),
        }
    }

    async fn sql_batch(&mut self, message: Message) -> Result<()> {
        let mut payload = message.payload;
        let transaction = skip_all_headers(&mut payload)?;
        let chars = payload.len() / 2;
        let sql = read_utf16(&mut payload, chars)?;
        let reset = message.first_status.contains(PacketStatus::RESET_CONNECTION);
        self.shared
            .record(Request::SqlBatch {
                sql: sql.clone(),
                transaction,
                reset,
            })
            .await;

        let mut steps = Vec::new();
        if reset {
            self.transaction = 0;
            self.savepoints.clear();
            self.prepared.clear();
            steps = MockResponse::new().env_change(EnvChange::ResetConnectionAck).into_steps();
        }
        steps.extend(self.lookup(&self.shared.config.responses, &sql).into_steps());
        self.respond_steps(steps).await
    }

    async fn rpc(&mut self, message: Message) -> Result<()> {
        let mut payload = message.payload;
        let transaction = skip_all_headers(&mut payload)?;
        ensure(&payload, 2)?;
        let name_len = payload.get_u16_le();
        let procedure = if name_len == 0xFFFF {
            ensure(&payload, 2)?;
            match payload.get_u16_le() {
                id if id == ProcId::ExecuteSql as u16 => "sp_executesql".to_string(),
                id if id == ProcId::Prepare as u16 => "sp_prepare".to_string(),
                id if id == ProcId::Execute as u16 => "sp_execute".to_string(),
                id if id == ProcId::Unprepare as u16 => "sp_unprepare".to_string(),
                id => format!("proc#{id}"),
            }
        } else {
            read_utf16(&mut payload, usize::from(name_len))?
        };
        ensure(&payload, 2)?;
        payload.advance(2);

        let mut params = Vec::new();
        while payload.has_remaining() {
            let name = read_b_varchar(&mut payload)?;
            ensure(&payload, 1)?;
            let status = payload.get_u8();
            let type_info = TypeInfo::decode(&mut payload)?;
            let raw = type_info.read_param_value(&mut payload)?;
            let value = decode_value(raw, &ValueMeta::new(&type_info)).unwrap_or(SqlValue::Null);
            params.push(RecordedParam {
                name,
                type_info,
                value,
                output: status & 0x01 != 0,
            });
        }

        let scripted = match procedure.as_str() {
            "sp_executesql" => {
                let sql = string_param(&params, 0);
                self.lookup(&self.shared.config.responses, &sql)
            }
            "sp_prepare" if self.shared.config.procedures.contains_key(&normalize(&procedure)) => {
                self.lookup(&self.shared.config.procedures, &procedure)
            }
            "sp_prepare" => {
                let handle = self.next_handle;
                self.next_handle += 1;
                self.prepared.insert(handle, string_param(&params, 2));
                MockResponse::new()
                    .return_status(0)
                    .return_value(0, "", TypeInfo::new(TypeId::IntN).with_length(4), SqlValue::Int(handle))
                    .done_proc(0)
            }
            "sp_execute" => match self.prepared.get(&int_param(&params)) {
                Some(sql) => self.lookup(&self.shared.config.responses, sql),
                None => unknown_handle(int_param(&params)),
            },
            "sp_unprepare" => match self.prepared.remove(&int_param(&params)) {
                Some(_) => MockResponse::new().done_proc(0),
                None => unknown_handle(int_param(&params)),
            },
            _ => self.lookup(&self.shared.config.procedures, &procedure),
        };
        self.shared
            .record(Request::Rpc {
                procedure,
                params,
                transaction,
            })
            .await;
        self.respond(scripted).await
    }

    async fn transaction_request(&mut self, message: Message) -> Result<()> {
        let mut payload = message.payload;
        let transaction = skip_all_headers(&mut payload)?;
        ensure(&payload, 2)?;
        let (kind, name) = match payload.get_u16_le() {
            TM_BEGIN_XACT => {
                ensure(&payload, 1)?;
                let isolation = payload.get_u8();
                (TransactionKind::Begin(isolation), read_b_varchar(&mut payload)?)
            }
            TM_COMMIT_XACT => (TransactionKind::Commit, read_b_varchar(&mut payload)?),
            TM_ROLLBACK_XACT => (TransactionKind::Rollback, read_b_varchar(&mut payload)?),
            TM_SAVE_XACT => (TransactionKind::Save, read_b_varchar(&mut payload)?),
            other => {
                return Err(ProtocolError::InvalidLength {
                    length: usize::from(other),
                    type_name: "transaction request type",
                }
                .into());
            }
        };
        self.shared
            .record(Request::Transaction {
                kind,
                name: name.clone(),
                transaction,
            })
            .await;

        let response = match kind {
            TransactionKind::Begin(isolation) => {
                if isolation > IsolationLevel::Snapshot as u8 {
                    MockResponse::error(1010, "Invalid isolation level.")
                } else {
                    self.transaction = self.shared.next_transaction.fetch_add(1, Ordering::SeqCst) as u64 + 0x1000;
                    self.savepoints.clear();
                    MockResponse::new()
                        .env_change(EnvChange::BeginTransaction(self.transaction))
                        .done_status(DoneStatus::empty(), 0)
                }
            }
            _ if self.transaction == 0 => MockResponse::error(
                3902,
                "The transaction request has no corresponding BEGIN TRANSACTION.",
            ),
            TransactionKind::Commit => {
                self.transaction = 0;
                MockResponse::new()
                    .env_change(EnvChange::CommitTransaction)
                    .done_status(DoneStatus::empty(), 0)
            }
            TransactionKind::Rollback if self.savepoints.contains(&name) => {
                MockResponse::new().done_status(DoneStatus::empty(), 0)
            }
            TransactionKind::Rollback => {
                self.transaction = 0;
                self.savepoints.clear();
                MockResponse::new()
                    .env_change(EnvChange::RollbackTransaction)
                    .done_status(DoneStatus::empty(), 0)
            }
            TransactionKind::Save => {
                self.savepoints.push(name);
                MockResponse::new().done_status(DoneStatus::empty(), 0)
            }
        };
        self.respond(response).await
    }

    async fn bulk_load(&mut self, message: Message) -> Result<()> {
        match decode_bulk(message.payload) {
            Ok((columns, rows)) => {
                let count = rows.len() as u64;
                self.shared.record(Request::BulkLoad { columns, rows }).await;
                self.respond(MockResponse::affected(count)).await
            }
            Err(e) => {
                tracing::debug!(error = %e, "rejecting bulk load data");
                self.respond(MockResponse::error(
                    4804,
                    "While reading current row from host, a premature end-of-message was encountered.",
                ))
                .await
            }
        }
    }

    fn lookup(&self, scripts: &HashMap<String, MockResponse>, key: &str) -> MockResponse {
        scripts
            .get(&normalize(key))
            .cloned()
            .unwrap_or_else(|| self.shared.config.default_response.clone())
    }

    async fn send(&mut self, packet_type: PacketType, payload: Bytes) -> Result<()> {
        let mut out = BytesMut::new();
        for packet in frame(packet_type, payload, DEFAULT_PACKET_SIZE, PacketStatus::NORMAL) {
            packet.encode(&mut out);
        }
        self.write.write_all(&out).await?;
        Ok(())
    }

    /// Write a scripted response, honouring pauses. An Attention arriving
    /// during a pause cuts the response short with an acknowledgement.
    async fn respond(&mut self, response: MockResponse) -> Result<()> {
        self.respond_steps(response.into_steps()).await
    }

    async fn respond_steps(&mut self, steps: Vec<Step>) -> Result<()> {
        let last_tokens = steps.iter().rposition(|s| matches!(s, Step::Tokens(_)));
        let mut ended = false;

        for (i, step) in steps.into_iter().enumerate() {
            match step {
                Step::Tokens(bytes) => {
                    let last = Some(i) == last_tokens && !ended;
                    self.write_segment(bytes, last).await?;
                    if last {
                        ended = true;
                    }
                }
                Step::Pause(delay) => {
                    if self.pause(delay).await? {
                        return self.write_segment(attention_ack(), true).await;
                    }
                }
            }
        }
        if !ended {
            self.write_segment(Bytes::new(), true).await?;
        }
        Ok(())
    }

    /// Sleep for `delay`; `true` if an acknowledged Attention arrived.
    async fn pause(&mut self, delay: std::time::Duration) -> Result<bool> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Ok(false),
                message = self.rx.recv() => match message.transpose()? {
                    Some(message) if message.packet_type == PacketType::Attention => {
                        self.shared.record(Request::Attention).await;
                        if self.shared.config.acknowledge_attention {
                            return Ok(true);
                        }
                    }
                    Some(message) => self.pending.push_back(message),
                    None => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
                },
            }
        }
    }

    async fn write_segment(&mut self, tokens: Bytes, last: bool) -> Result<()> {
        let mut out = BytesMut::new();
        for mut packet in frame(PacketType::TabularResult, tokens, DEFAULT_PACKET_SIZE, PacketStatus::NORMAL) {
            if !last {
                packet.header.status.remove(PacketStatus::END_OF_MESSAGE);
            }
            packet.encode(&mut out);
        }
        self.write.write_all(&out).await?;
        self.write.flush().await?;
        Ok(())
    }
}

/// Skip ALL_HEADERS, returning the transaction descriptor it carries.
fn skip_all_headers(payload: &mut Bytes) -> Result<u64> {
    ensure(&*payload, 4)?;
    let total = payload.get_u32_le() as usize;
    ensure(&*payload, total.saturating_sub(4))?;
    let mut headers = payload.split_to(total.saturating_sub(4));
    let mut descriptor = 0;
    while headers.remaining() >= 6 {
        let length = headers.get_u32_le() as usize;
        let kind = headers.get_u16_le();
        let body = length.saturating_sub(6).min(headers.remaining());
        if kind == 0x0002 && body >= 8 {
            descriptor = headers.get_u64_le();
            headers.advance(body - 8);
        } else {
            headers.advance(body);
        }
    }
    Ok(descriptor)
}

fn decode_bulk(payload: Bytes) -> std::result::Result<(Vec<String>, Vec<Vec<SqlValue>>), ProtocolError> {
    let mut parser = TokenParser::from_message(payload);
    let mut metadata: Option<Arc<ColMetaData>> = None;
    let mut rows = Vec::new();
    let mut done = false;
    loop {
        match parser.next_token(metadata.as_deref())? {
            Parsed::Token(Token::ColMetaData(columns)) => metadata = Some(columns),
            Parsed::Token(Token::Row(raw) | Token::NbcRow(raw)) => {
                let columns = metadata.as_ref().ok_or(ProtocolError::RowWithoutMetadata)?;
                let row = Row::decode(raw, columns, DateTimePolicy::default()).map_err(|_| ProtocolError::UnexpectedEof)?;
                rows.push(row.values().to_vec());
            }
            Parsed::Token(Token::Done(_)) => done = true,
            Parsed::Token(_) => {}
            Parsed::Finished | Parsed::NeedMoreData => break,
        }
    }
    if !done {
        return Err(ProtocolError::UnexpectedEof);
    }
    let columns = metadata
        .map(|m| m.columns.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();
    Ok((columns, rows))
}

fn attention_ack() -> Bytes {
    let mut buf = BytesMut::new();
    Done {
        status: DoneStatus::ATTN,
        cur_cmd: 0,
        row_count: 0,
    }
    .encode(TokenType::Done, &mut buf);
    buf.freeze()
}
