//! Response handling.
//!
//! A request's response is parsed as it arrives: the reader pulls tokens
//! from a [`TokenParser`] and only reads the next packet when the parser runs
//! out of bytes. Decoded events go to a caller-supplied [`ResponseHandler`].
//!
//! The same loop drives cancellation. When an Attention is outstanding the
//! remaining tokens are discarded until the server acknowledges it with a
//! `DONE` carrying the `ATTN` bit.

use std::sync::Arc;
use std::time::Duration;

use mssql_codec::Connection;
use mssql_types::{DateTimePolicy, Row, SqlValue, ValueMeta, decode_value};
use tds_protocol::{ColMetaData, Done, Parsed, ServerMessage, Token, TokenParser};
use tokio::time::Instant;

use crate::cancel::CancelState;
use crate::error::{Error, Result};
use crate::login::Transport;
use crate::state::{EnvAction, SessionState};

/// An output parameter returned by a procedure or `sp_executesql`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParameter {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name including the leading `@`.
    pub name: String,
    /// Decoded value.
    pub value: SqlValue,
}

/// Receives the events of a response in wire order.
///
/// Every method has a no-op default so handlers only implement what they
/// need. Row events are never delivered after the request they belong to has
/// completed or been cancelled.
pub trait ResponseHandler: Send {
    /// A new result set starts.
    fn on_metadata(&mut self, _columns: &Arc<ColMetaData>) {}

    /// A row of the current result set.
    fn on_row(&mut self, _row: Row) {}

    /// A statement or procedure completed.
    fn on_done(&mut self, _done: &Done) {}

    /// The server reported an error.
    fn on_error(&mut self, _message: &ServerMessage) {}

    /// The server sent an informational message.
    fn on_info(&mut self, _message: &ServerMessage) {}

    /// An output parameter value.
    fn on_return_value(&mut self, _param: OutputParameter) {}

    /// A procedure's return status.
    fn on_return_status(&mut self, _status: i32) {}
}

impl ResponseHandler for () {}

/// One result set gathered by [`Collector`].
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// Column descriptions.
    pub columns: Arc<ColMetaData>,
    /// Rows in arrival order.
    pub rows: Vec<Row>,
}

/// Handler that keeps everything it receives.
#[derive(Debug, Default)]
pub struct Collector {
    /// Result sets in arrival order.
    pub result_sets: Vec<ResultSet>,
    /// DONE tokens.
    pub dones: Vec<Done>,
    /// ERROR tokens.
    pub errors: Vec<ServerMessage>,
    /// INFO tokens.
    pub infos: Vec<ServerMessage>,
    /// Output parameters.
    pub outputs: Vec<OutputParameter>,
    /// Return status, if any.
    pub return_status: Option<i32>,
}

impl Collector {
    /// Empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of all result sets, flattened.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.result_sets.iter().flat_map(|set| set.rows.iter())
    }

    /// Output parameter by name, with or without the leading `@`.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&SqlValue> {
        let name = name.trim_start_matches('@');
        self.outputs
            .iter()
            .find(|p| p.name.trim_start_matches('@').eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }
}

impl ResponseHandler for Collector {
    fn on_metadata(&mut self, columns: &Arc<ColMetaData>) {
        self.result_sets.push(ResultSet {
            columns: Arc::clone(columns),
            rows: Vec::new(),
        });
    }

    fn on_row(&mut self, row: Row) {
        if let Some(set) = self.result_sets.last_mut() {
            set.rows.push(row);
        }
    }

    fn on_done(&mut self, done: &Done) {
        self.dones.push(*done);
    }

    fn on_error(&mut self, message: &ServerMessage) {
        self.errors.push(message.clone());
    }

    fn on_info(&mut self, message: &ServerMessage) {
        self.infos.push(message.clone());
    }

    fn on_return_value(&mut self, param: OutputParameter) {
        self.outputs.push(param);
    }

    fn on_return_status(&mut self, status: i32) {
        self.return_status = Some(status);
    }
}

/// Summary of a completed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOutcome {
    /// Sum of the row counts reported by DONE tokens.
    pub rows_affected: u64,
    /// Return status of the executed procedure.
    pub return_status: Option<i32>,
    /// Number of DONE, DONEPROC and DONEINPROC tokens seen.
    pub done_count: usize,
}

/// Why the response is being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abort {
    /// The caller cancelled through a cancel handle.
    Cancelled,
    /// The request timeout expired.
    TimedOut,
    /// An Attention left over from an earlier request.
    Stale,
}

enum Event {
    Chunk(std::result::Result<mssql_codec::MessageChunk, mssql_codec::CodecError>),
    Deadline,
    CancelRequested,
    CancelExpired,
}

/// Everything the reader needs from the client for one response.
pub(crate) struct ResponseReader<'a> {
    pub(crate) connection: &'a mut Connection<Box<dyn Transport>>,
    pub(crate) session: &'a mut SessionState,
    pub(crate) cancel: &'a CancelState,
    pub(crate) policy: DateTimePolicy,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) cancel_timeout: Duration,
}

impl ResponseReader<'_> {
    /// Read the response to the request just sent.
    pub(crate) async fn read(&mut self, handler: &mut dyn ResponseHandler) -> Result<RequestOutcome> {
        self.run(handler, None).await
    }

    /// Discard everything up to the acknowledgement of an Attention sent
    /// after the previous request completed.
    pub(crate) async fn drain_attention(&mut self) -> Result<()> {
        if !self.connection.attention_pending() {
            return Ok(());
        }
        tracing::debug!("draining acknowledgement of a late attention");
        match self.run(&mut (), Some(Abort::Stale)).await {
            Ok(_) | Err(Error::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn run(&mut self, handler: &mut dyn ResponseHandler, initial: Option<Abort>) -> Result<RequestOutcome> {
        let attention = self.connection.attention_sender();
        let now = Instant::now();
        let deadline = self.request_timeout.map(|timeout| now + timeout);
        let mut abort = initial;
        let mut cancel_deadline = initial.map(|_| now + self.cancel_timeout);

        let mut parser = TokenParser::new();
        let mut metadata: Option<Arc<ColMetaData>> = None;
        let mut outcome = RequestOutcome::default();
        let mut first_error: Option<Error> = None;
        let mut error_since_done = false;

        loop {
            let token = match parser.next_token(metadata.as_deref())? {
                Parsed::Token(token) => token,
                Parsed::Finished => {
                    if abort.is_some() && self.connection.attention_pending() {
                        // The acknowledgement arrives as a message of its own.
                        parser = TokenParser::new();
                        continue;
                    }
                    break;
                }
                Parsed::NeedMoreData => {
                    let event = tokio::select! {
                        biased;
                        chunk = self.connection.read_chunk() => Event::Chunk(chunk),
                        () = sleep_until(cancel_deadline), if cancel_deadline.is_some() => Event::CancelExpired,
                        () = self.cancel.notify.notified(), if abort.is_none() => Event::CancelRequested,
                        () = sleep_until(deadline), if abort.is_none() && deadline.is_some() => Event::Deadline,
                    };
                    match event {
                        Event::Chunk(chunk) => {
                            let chunk = chunk?;
                            parser.extend(chunk.payload);
                            if chunk.last {
                                parser.finish();
                            }
                        }
                        Event::CancelRequested => {
                            if self.connection.attention_pending() {
                                tracing::debug!("request cancelled, waiting for acknowledgement");
                                abort = Some(Abort::Cancelled);
                                cancel_deadline = Some(Instant::now() + self.cancel_timeout);
                            }
                        }
                        Event::Deadline => {
                            tracing::warn!(timeout = ?self.request_timeout, "request timed out, sending attention");
                            attention.send_attention().await?;
                            abort = Some(Abort::TimedOut);
                            cancel_deadline = Some(Instant::now() + self.cancel_timeout);
                        }
                        Event::CancelExpired => {
                            tracing::warn!(timeout = ?self.cancel_timeout, "attention not acknowledged in time");
                            return Err(Error::CancelTimeout);
                        }
                    }
                    continue;
                }
            };

            let draining = abort.is_some();
            match token {
                Token::ColMetaData(columns) => {
                    if !draining {
                        handler.on_metadata(&columns);
                    }
                    metadata = Some(columns);
                }
                Token::Row(raw) | Token::NbcRow(raw) => {
                    if draining {
                        continue;
                    }
                    let columns = metadata.as_ref().ok_or(tds_protocol::ProtocolError::RowWithoutMetadata)?;
                    match Row::decode(raw, columns, self.policy) {
                        Ok(row) => handler.on_row(row),
                        Err(e) => record_decode_error(&mut first_error, e.into()),
                    }
                }
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    if done.is_attention_ack() {
                        if abort.is_none() {
                            if self.connection.attention_pending() {
                                // Acknowledged before the cancel was noticed.
                                abort = Some(Abort::Cancelled);
                            } else {
                                tracing::warn!("unsolicited attention acknowledgement");
                            }
                        }
                        tracing::debug!("attention acknowledged");
                        self.connection.clear_attention();
                        continue;
                    }
                    if let Some(rows) = done.rows() {
                        outcome.rows_affected += rows;
                    }
                    outcome.done_count += 1;
                    if done.is_error() && !error_since_done && first_error.is_none() {
                        first_error = Some(Error::CommandFailed);
                    }
                    error_since_done = false;
                    if !draining {
                        handler.on_done(&done);
                    }
                }
                Token::Error(message) => {
                    tracing::debug!(
                        number = message.number,
                        class = message.class,
                        message = %message.message,
                        "server error"
                    );
                    error_since_done = true;
                    if !draining {
                        handler.on_error(&message);
                    }
                    if first_error.is_none() {
                        first_error = Some(Error::from(message));
                    }
                }
                Token::Info(message) => {
                    tracing::trace!(number = message.number, message = %message.message, "server info");
                    if !draining {
                        handler.on_info(&message);
                    }
                }
                Token::EnvChange(env) => match self.session.apply(env) {
                    EnvAction::PacketSize(size) => self.connection.set_packet_size(size)?,
                    EnvAction::Routing { host, port } => {
                        tracing::warn!(host = %host, port, "ignoring routing outside of login");
                    }
                    EnvAction::None => {}
                },
                Token::ReturnStatus(status) => {
                    outcome.return_status = Some(status);
                    if !draining {
                        handler.on_return_status(status);
                    }
                }
                Token::ReturnValue(rv) => {
                    if draining {
                        continue;
                    }
                    let meta = ValueMeta::new(&rv.type_info).with_policy(self.policy);
                    match decode_value(rv.value, &meta) {
                        Ok(value) => handler.on_return_value(OutputParameter {
                            ordinal: rv.ordinal,
                            name: rv.name,
                            value,
                        }),
                        Err(e) => record_decode_error(&mut first_error, e.into()),
                    }
                }
                Token::Order(columns) => tracing::trace!(?columns, "order"),
                other => tracing::debug!(token = ?other, "ignoring unexpected token in response"),
            }
        }

        match abort {
            Some(Abort::Cancelled | Abort::Stale) => Err(Error::Cancelled),
            Some(Abort::TimedOut) => Err(Error::RequestTimeout),
            None => first_error.map_or(Ok(outcome), Err),
        }
    }
}

/// A value that cannot be decoded fails the request, but the rest of the
/// response is still read so the connection stays usable.
fn record_decode_error(first_error: &mut Option<Error>, error: Error) {
    tracing::debug!(error = %error, "value decode failed, reading the rest of the response");
    if first_error.is_none() {
        *first_error = Some(error);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
