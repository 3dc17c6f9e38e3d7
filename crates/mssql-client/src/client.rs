//! SQL Server client.
//!
//! A [`Client`] owns one logged-in connection and runs one request at a
//! time. Every operation takes `&mut self`; a second request can only be
//! attempted after an earlier request future was dropped mid-flight, and is
//! rejected with [`Error::RequestInProgress`] without touching the wire.

use std::sync::Arc;

use bytes::Bytes;
use mssql_codec::Connection;
use once_cell::sync::Lazy;
use regex::Regex;
use tds_protocol::{IsolationLevel, PacketStatus, PacketType, RpcRequest, SqlBatch, TransactionRequest};

use crate::bulk::{BulkLoad, BulkRow};
use crate::cancel::{CancelHandle, CancelState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::login::{self, LoggedIn, Transport};
use crate::param::{self, Parameter};
use crate::prepared::{self, HandleCapture, PreparedHandle};
use crate::response::{RequestOutcome, ResponseHandler, ResponseReader};
use crate::state::{ConnectionState, SessionState, StateMachine};

static TRANSACTION_NAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[\p{L}_#][\p{L}\p{Nd}_@#$]{0,31}$").unwrap()
});

/// A connection to SQL Server.
pub struct Client {
    config: Config,
    machine: StateMachine,
    connection: Option<Connection<Box<dyn Transport>>>,
    session: SessionState,
    cancel: Arc<CancelState>,
    /// Identity of the server session; changes on reset.
    session_id: u64,
}

impl Client {
    /// Connect, log in and apply the session options.
    ///
    /// Transient login errors are retried per [`Config::retry`] and routing
    /// redirects are followed up to [`Config::redirect`]; all of it must
    /// finish within the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration,
    /// [`Error::ConnectTimeout`] when the deadline passes, and otherwise the
    /// error that ended the last attempt.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let connect_timeout = config.timeouts.connect_timeout;
        let mut client = Self {
            config,
            machine: StateMachine::new(),
            connection: None,
            session: SessionState::default(),
            cancel: Arc::new(CancelState::default()),
            session_id: prepared::next_session(),
        };

        match tokio::time::timeout(connect_timeout, client.establish()).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %client.config.host,
                    database = client.session.database().unwrap_or_default(),
                    server_version = %client.session.server_version().unwrap_or_default(),
                    "connection established"
                );
                Ok(client)
            }
            Ok(Err(e)) => {
                client.shutdown();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(timeout = ?connect_timeout, "connect timed out");
                client.shutdown();
                Err(Error::ConnectTimeout)
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let mut target = self.config.clone();
        let mut redirects = 0u8;
        let mut attempt = 0u32;

        let logged_in = loop {
            match login::connect_once(&target, &mut self.machine).await {
                Ok(logged_in) => break logged_in,
                Err(Error::Routing { host, port }) => {
                    self.machine.transition(ConnectionState::Rerouting)?;
                    redirects += 1;
                    let max = self.config.redirect.max_redirects;
                    if redirects > max {
                        return Err(Error::TooManyRedirects { max });
                    }
                    tracing::info!(host = %host, port, redirect = redirects, "following routing redirect");
                    target = target.redirected(&host, port);
                }
                Err(e) if e.is_transient_server_error() => {
                    attempt += 1;
                    if !self.config.retry.should_retry(attempt) {
                        return Err(e);
                    }
                    self.machine.transition(ConnectionState::TransientFailureRetry)?;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_retries = self.config.retry.max_retries,
                        "transient login failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry.interval).await;
                }
                Err(e) => return Err(e),
            }
        };

        let LoggedIn { connection, session } = logged_in;
        self.connection = Some(connection);
        self.session = session;
        self.apply_session(PacketStatus::NORMAL).await
    }

    /// Send the session options batch, flagging the first packet with
    /// `status`.
    async fn apply_session(&mut self, status: PacketStatus) -> Result<()> {
        self.machine.transition(ConnectionState::LoggedInSendingInitialSql)?;
        let payload = SqlBatch::new(self.config.session.initial_sql())
            .with_transaction(self.session.transaction_descriptor())
            .encode();
        let result = self.exchange(PacketType::SqlBatch, payload, status, &mut ()).await;
        match result {
            Ok(_) => self.machine.transition(ConnectionState::LoggedIn),
            Err(e) if e.is_fatal() => {
                self.shutdown();
                Err(e)
            }
            Err(e) => {
                self.machine.transition(ConnectionState::LoggedIn)?;
                Err(e)
            }
        }
    }

    /// Run a SQL batch.
    ///
    /// # Errors
    ///
    /// Returns the first server error of the batch, or a transport, protocol,
    /// cancellation or timeout error.
    pub async fn execute_batch(&mut self, sql: &str, handler: &mut dyn ResponseHandler) -> Result<RequestOutcome> {
        tracing::debug!(sql.len = sql.len(), "executing batch");
        let payload = SqlBatch::new(sql)
            .with_transaction(self.session.transaction_descriptor())
            .encode();
        self.request(PacketType::SqlBatch, payload, handler).await
    }

    /// Run a statement with parameters through `sp_executesql`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] for unnamed, duplicate or malformed
    /// parameter names and [`Error::Type`] for values that do not fit their
    /// declared type, both before anything is sent.
    pub async fn execute_parameterized(
        &mut self,
        sql: &str,
        params: &[Parameter],
        handler: &mut dyn ResponseHandler,
    ) -> Result<RequestOutcome> {
        let prepared = param::prepare(params, self.config.datetime_policy, true)?;
        tracing::debug!(params = params.len(), declarations = %prepared.declarations, "executing parameterized statement");
        let payload = RpcRequest::execute_sql(sql, &prepared.declarations, prepared.params)
            .with_transaction(self.session.transaction_descriptor())
            .encode()?;
        self.request(PacketType::Rpc, payload, handler).await
    }

    /// Call a stored procedure.
    ///
    /// Output parameters reach [`ResponseHandler::on_return_value`] and the
    /// procedure's return code [`ResponseHandler::on_return_status`].
    ///
    /// # Errors
    ///
    /// As [`execute_parameterized`](Self::execute_parameterized), except
    /// that parameters may all be positional.
    pub async fn execute_procedure(
        &mut self,
        name: &str,
        params: &[Parameter],
        handler: &mut dyn ResponseHandler,
    ) -> Result<RequestOutcome> {
        if name.trim().is_empty() {
            return Err(Error::Contract("procedure name must not be empty".into()));
        }
        let prepared = param::prepare(params, self.config.datetime_policy, false)?;
        tracing::debug!(procedure = name, params = params.len(), "calling procedure");
        let request = prepared
            .params
            .into_iter()
            .fold(RpcRequest::named(name), RpcRequest::param);
        let payload = request
            .with_transaction(self.session.transaction_descriptor())
            .encode()?;
        self.request(PacketType::Rpc, payload, handler).await
    }

    /// Prepare a statement with `sp_prepare` for repeated execution.
    ///
    /// `params` declare the statement's parameters by name and type; their
    /// values are not sent.
    ///
    /// # Errors
    ///
    /// As [`execute_parameterized`](Self::execute_parameterized), plus
    /// [`Error::MissingHandle`] when the server returns no handle.
    pub async fn prepare(&mut self, sql: &str, params: &[Parameter]) -> Result<PreparedHandle> {
        let declared = param::prepare(params, self.config.datetime_policy, true)?;
        tracing::debug!(params = params.len(), declarations = %declared.declarations, "preparing statement");
        let payload = RpcRequest::prepare(sql, &declared.declarations)
            .with_transaction(self.session.transaction_descriptor())
            .encode()?;
        let mut capture = HandleCapture::default();
        self.request(PacketType::Rpc, payload, &mut capture).await?;
        let handle = capture.handle.ok_or(Error::MissingHandle)?;
        tracing::debug!(handle, "statement prepared");
        Ok(PreparedHandle {
            handle,
            session: self.session_id,
            sql: sql.to_string(),
            names: params.iter().map(|p| p.name().to_string()).collect(),
        })
    }

    /// Run a prepared statement through `sp_execute`.
    ///
    /// `params` must name the prepared parameters in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] when the parameters differ from the
    /// prepared ones or the handle outlived its session, and otherwise as
    /// [`execute_parameterized`](Self::execute_parameterized).
    pub async fn execute_prepared(
        &mut self,
        statement: &PreparedHandle,
        params: &[Parameter],
        handler: &mut dyn ResponseHandler,
    ) -> Result<RequestOutcome> {
        self.check_session(statement)?;
        let matches = params.len() == statement.names.len()
            && params
                .iter()
                .zip(&statement.names)
                .all(|(param, name)| param.name().eq_ignore_ascii_case(name));
        if !matches {
            let given: Vec<&str> = params.iter().map(Parameter::name).collect();
            return Err(Error::Contract(format!(
                "parameters {given:?} do not match the prepared {:?}",
                statement.names
            )));
        }
        let encoded = param::prepare(params, self.config.datetime_policy, true)?;
        tracing::debug!(handle = statement.handle, params = params.len(), "executing prepared statement");
        let values = encoded
            .params
            .into_iter()
            .map(|mut param| {
                param.name.clear();
                param
            })
            .collect();
        let payload = RpcRequest::execute(statement.handle, values)
            .with_transaction(self.session.transaction_descriptor())
            .encode()?;
        self.request(PacketType::Rpc, payload, handler).await
    }

    /// Release a prepared statement with `sp_unprepare`.
    ///
    /// Handles from a session that has since been reset are already gone on
    /// the server and are dropped without a request.
    ///
    /// # Errors
    ///
    /// Returns the server error if the handle is unknown, or a transport
    /// error.
    pub async fn unprepare(&mut self, statement: PreparedHandle) -> Result<()> {
        if statement.session != self.session_id {
            tracing::debug!(handle = statement.handle, "prepared statement already released by a reset");
            return Ok(());
        }
        tracing::debug!(handle = statement.handle, "releasing prepared statement");
        let payload = RpcRequest::unprepare(statement.handle)
            .with_transaction(self.session.transaction_descriptor())
            .encode()?;
        self.request(PacketType::Rpc, payload, &mut ()).await?;
        Ok(())
    }

    fn check_session(&self, statement: &PreparedHandle) -> Result<()> {
        if statement.session == self.session_id {
            Ok(())
        } else {
            Err(Error::Contract(format!(
                "prepared statement {} belongs to an earlier session",
                statement.handle
            )))
        }
    }

    /// Begin a transaction. An empty name starts an unnamed one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] for an invalid name.
    pub async fn begin_transaction(&mut self, name: &str, isolation: IsolationLevel) -> Result<RequestOutcome> {
        self.transaction(TransactionRequest::Begin {
            isolation,
            name: transaction_name(name, true)?,
        })
        .await
    }

    /// Commit the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] for an invalid name and the server's error
    /// when no transaction is open.
    pub async fn commit(&mut self, name: &str) -> Result<RequestOutcome> {
        self.transaction(TransactionRequest::Commit {
            name: transaction_name(name, true)?,
            begin_new: false,
        })
        .await
    }

    /// Roll back the current transaction, or back to the savepoint `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] for an invalid name and the server's error
    /// when no transaction is open.
    pub async fn rollback(&mut self, name: &str) -> Result<RequestOutcome> {
        self.transaction(TransactionRequest::Rollback {
            name: transaction_name(name, true)?,
            begin_new: false,
        })
        .await
    }

    /// Create a savepoint inside the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] for a missing or invalid name, or when no
    /// transaction is open.
    pub async fn savepoint(&mut self, name: &str) -> Result<RequestOutcome> {
        let name = transaction_name(name, false)?;
        if !self.session.in_transaction() {
            return Err(Error::Contract("savepoint requires an open transaction".into()));
        }
        self.transaction(TransactionRequest::Save { name }).await
    }

    async fn transaction(&mut self, request: TransactionRequest) -> Result<RequestOutcome> {
        tracing::debug!(kind = request.kind(), descriptor = self.session.transaction_descriptor(), "transaction request");
        let payload = request.encode(self.session.transaction_descriptor())?;
        self.request(PacketType::TransactionManager, payload, &mut ()).await
    }

    /// Load `rows` into the table described by `bulk`.
    ///
    /// Sends the `INSERT BULK` statement, then streams the rows as they are
    /// pulled from `rows`. Returns the row count reported by the server.
    ///
    /// # Errors
    ///
    /// A load without columns fails with [`Error::Contract`] before anything
    /// is sent. A row that cannot be encoded ends the load: the partial
    /// message is terminated, the server's reply is drained and the encoding
    /// error is returned.
    pub async fn bulk_load<I>(&mut self, bulk: &mut BulkLoad, rows: I) -> Result<RequestOutcome>
    where
        I: IntoIterator,
        I::Item: Into<BulkRow>,
    {
        self.ensure_idle()?;
        bulk.start()?;
        tracing::debug!(table = bulk.table(), columns = bulk.columns().len(), "starting bulk load");
        self.execute_batch(&bulk.insert_bulk_sql(), &mut ()).await?;

        self.begin_request()?;
        let result = self.stream_bulk(bulk, rows).await;
        let result = self.finish_request(result);
        if let Ok(outcome) = &result {
            tracing::debug!(table = bulk.table(), rows = outcome.rows_affected, "bulk load complete");
        }
        result
    }

    async fn stream_bulk<I>(&mut self, bulk: &mut BulkLoad, rows: I) -> Result<RequestOutcome>
    where
        I: IntoIterator,
        I::Item: Into<BulkRow>,
    {
        let connection = self.connection.as_mut().ok_or(Error::ConnectionClosed)?;

        // The sink is opened first so a cancel never writes an Attention
        // ahead of the load.
        let mut failure = None;
        let mut sink = connection.start_message(PacketType::BulkLoad, PacketStatus::NORMAL);
        self.cancel.begin_request();
        for chunk in bulk.encode(rows) {
            if sink.attention_requested() {
                tracing::debug!("bulk load cancelled, abandoning the message");
                break;
            }
            match chunk {
                Ok(bytes) => sink.write(&bytes).await?,
                Err(e) => {
                    tracing::debug!(error = %e, "bulk row rejected, ending load");
                    failure = Some(e);
                    break;
                }
            }
        }
        sink.finish().await?;

        let mut reader = ResponseReader {
            connection,
            session: &mut self.session,
            cancel: &self.cancel,
            policy: self.config.datetime_policy,
            request_timeout: self.config.timeouts.request_timeout,
            cancel_timeout: self.config.timeouts.cancel_timeout,
        };
        let outcome = reader.read(&mut ()).await;
        match (failure, outcome) {
            (Some(_), Err(e)) if e.is_fatal() => Err(e),
            (Some(e), _) => Err(e),
            (None, outcome) => outcome,
        }
    }

    /// Reset the session: the server drops temporary objects, rolls back
    /// open transactions and restores defaults, and the session options
    /// batch is applied again.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset batch fails.
    pub async fn reset(&mut self) -> Result<()> {
        self.ensure_idle()?;
        tracing::debug!("resetting connection");
        self.session_id = prepared::next_session();
        self.apply_session(PacketStatus::RESET_CONNECTION).await
    }

    /// A handle that cancels the running request from another task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the client is closed.
    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        let connection = self.connection.as_ref().ok_or(Error::ConnectionClosed)?;
        Ok(CancelHandle::new(connection.attention_sender(), Arc::clone(&self.cancel)))
    }

    /// Close the connection. Further requests fail with
    /// [`Error::ConnectionClosed`].
    pub fn close(&mut self) {
        if self.connection.is_some() {
            tracing::info!(host = %self.config.host, "connection closed");
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.end_request();
        self.connection = None;
        self.machine.close();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine.current()
    }

    /// Session values reported by the server.
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Current database, once the server has reported one.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.session.database()
    }

    /// Descriptor of the open transaction, zero outside one.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.session.transaction_descriptor()
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction()
    }

    /// Configuration the client was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.machine.current() {
            ConnectionState::LoggedIn => Ok(()),
            ConnectionState::SentClientRequest | ConnectionState::SentAttention => Err(Error::RequestInProgress),
            ConnectionState::Final => Err(Error::ConnectionClosed),
            other => Err(Error::InvalidState(format!("cannot send a request while {other}"))),
        }
    }

    fn begin_request(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.machine.transition(ConnectionState::SentClientRequest)
    }

    async fn request(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        handler: &mut dyn ResponseHandler,
    ) -> Result<RequestOutcome> {
        self.begin_request()?;
        let result = self.exchange(packet_type, payload, PacketStatus::NORMAL, handler).await;
        self.finish_request(result)
    }

    /// Send one request message and read its response.
    async fn exchange(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        status: PacketStatus,
        handler: &mut dyn ResponseHandler,
    ) -> Result<RequestOutcome> {
        let connection = self.connection.as_mut().ok_or(Error::ConnectionClosed)?;
        let mut reader = ResponseReader {
            connection,
            session: &mut self.session,
            cancel: &self.cancel,
            policy: self.config.datetime_policy,
            request_timeout: self.config.timeouts.request_timeout,
            cancel_timeout: self.config.timeouts.cancel_timeout,
        };
        reader.drain_attention().await?;

        self.cancel.begin_request();
        tracing::trace!(?packet_type, bytes = payload.len(), "sending request");
        reader.connection.send_message(packet_type, payload, status).await?;
        reader.read(handler).await
    }

    fn finish_request(&mut self, result: Result<RequestOutcome>) -> Result<RequestOutcome> {
        self.cancel.end_request();
        match &result {
            Err(e) if e.is_fatal() => {
                tracing::warn!(error = %e, "closing connection after fatal error");
                self.shutdown();
            }
            Err(Error::Cancelled | Error::RequestTimeout) => {
                self.machine.transition(ConnectionState::SentAttention)?;
                self.machine.transition(ConnectionState::LoggedIn)?;
            }
            _ => self.machine.transition(ConnectionState::LoggedIn)?,
        }
        result
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("state", &self.machine.current())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Check a transaction or savepoint name; empty is only allowed where the
/// server accepts an unnamed transaction.
fn transaction_name(name: &str, allow_empty: bool) -> Result<String> {
    if name.is_empty() {
        return if allow_empty {
            Ok(String::new())
        } else {
            Err(Error::Contract("savepoint name must not be empty".into()))
        };
    }
    if !TRANSACTION_NAME.is_match(name) {
        return Err(Error::Contract(format!("invalid transaction name {name:?}")));
    }
    Ok(name.to_string())
}
