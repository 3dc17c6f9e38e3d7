//! Scripted responses.
//!
//! A [`MockResponse`] is a sequence of encoded tokens, optionally broken
//! up by pauses. The server writes everything before a pause, waits, then
//! continues; an Attention arriving during a pause ends the response early
//! with an acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::{DateTimePolicy, SqlValue, ValueMeta, encode_param};
use tds_protocol::codec::write_b_varchar;
use tds_protocol::{
    ColMetaData, ColumnData, ColumnFlags, Done, DoneStatus, EnvChange, ServerMessage, TokenType, TypeId, TypeInfo,
};

/// `cur_cmd` reported for SELECT.
const CMD_SELECT: u16 = 0xC1;

/// A result set column.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl MockColumn {
    /// A nullable column of the given type.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info,
            nullable: true,
        }
    }

    /// An `int` column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::IntN).with_length(4))
    }

    /// A `bigint` column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::IntN).with_length(8))
    }

    /// An `nvarchar(len)` column.
    pub fn nvarchar(name: impl Into<String>, len: u32) -> Self {
        Self::new(name, TypeInfo::new(TypeId::NVarChar).with_length(len * 2))
    }

    /// Set the nullable flag.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn data(&self) -> ColumnData {
        let mut column = ColumnData::new(self.name.clone(), self.type_info.clone());
        column.flags = if self.nullable {
            ColumnFlags::NULLABLE
        } else {
            ColumnFlags::empty()
        };
        column
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Tokens(Bytes),
    Pause(Duration),
}

/// A scripted server response.
///
/// ```rust,ignore
/// let response = MockResponse::new()
///     .columns(vec![MockColumn::int("n")])
///     .row(vec![SqlValue::Int(42)])
///     .done(1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    steps: Vec<Step>,
    buf: BytesMut,
    columns: Arc<Vec<MockColumn>>,
}

impl MockResponse {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single `DONE` with no row count.
    pub fn empty() -> Self {
        Self::new().done_status(DoneStatus::empty(), 0)
    }

    /// A `DONE` reporting `count` affected rows.
    pub fn affected(count: u64) -> Self {
        Self::new().done(count)
    }

    /// One result set followed by a counted `DONE`.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        let count = rows.len() as u64;
        rows.into_iter()
            .fold(Self::new().columns(columns), Self::row)
            .done(count)
    }

    /// One column, one row.
    pub fn scalar(column: MockColumn, value: SqlValue) -> Self {
        Self::rows(vec![column], vec![vec![value]])
    }

    /// An `ERROR` of class 16 followed by `DONE` with the error bit.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::new().error_token(number, 16, message).done_error()
    }

    /// Emit COLMETADATA; later rows are encoded against these columns.
    #[must_use]
    pub fn columns(mut self, columns: Vec<MockColumn>) -> Self {
        let metadata = ColMetaData {
            columns: columns.iter().map(MockColumn::data).collect(),
        };
        encode_or_skip(metadata.encode(&mut self.buf), "COLMETADATA");
        self.columns = Arc::new(columns);
        self
    }

    /// Emit a ROW with one value per column.
    #[must_use]
    pub fn row(mut self, values: Vec<SqlValue>) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (column, value) in self.columns.iter().zip(values) {
            put_value(&mut self.buf, ValueMeta::new(&column.type_info).in_row(), value);
        }
        self
    }

    /// Emit `DONE` with a row count.
    #[must_use]
    pub fn done(self, count: u64) -> Self {
        self.done_status(DoneStatus::COUNT, count)
    }

    /// Emit `DONE` with the MORE bit and a row count.
    #[must_use]
    pub fn done_more(self, count: u64) -> Self {
        self.done_status(DoneStatus::COUNT | DoneStatus::MORE, count)
    }

    /// Emit `DONE` with the error bit.
    #[must_use]
    pub fn done_error(self) -> Self {
        self.done_status(DoneStatus::ERROR, 0)
    }

    /// Emit `DONE` with explicit status bits.
    #[must_use]
    pub fn done_status(self, status: DoneStatus, count: u64) -> Self {
        self.done_token(TokenType::Done, status, count)
    }

    /// Emit `DONEPROC`.
    #[must_use]
    pub fn done_proc(self, count: u64) -> Self {
        self.done_token(TokenType::DoneProc, DoneStatus::COUNT, count)
    }

    /// Emit `DONEINPROC`.
    #[must_use]
    pub fn done_in_proc(self, count: u64) -> Self {
        self.done_token(TokenType::DoneInProc, DoneStatus::COUNT | DoneStatus::MORE, count)
    }

    fn done_token(mut self, token_type: TokenType, status: DoneStatus, count: u64) -> Self {
        Done {
            status,
            cur_cmd: CMD_SELECT,
            row_count: count,
        }
        .encode(token_type, &mut self.buf);
        self
    }

    /// Emit an `ERROR` token.
    #[must_use]
    pub fn error_token(mut self, number: i32, class: u8, message: impl Into<String>) -> Self {
        encode_or_skip(message_token(number, class, message.into()).encode(TokenType::Error, &mut self.buf), "ERROR");
        self
    }

    /// Emit an `INFO` token.
    #[must_use]
    pub fn info(mut self, number: i32, message: impl Into<String>) -> Self {
        encode_or_skip(message_token(number, 0, message.into()).encode(TokenType::Info, &mut self.buf), "INFO");
        self
    }

    /// Emit an `ENVCHANGE` token.
    #[must_use]
    pub fn env_change(mut self, env: EnvChange) -> Self {
        encode_or_skip(env.encode(&mut self.buf), "ENVCHANGE");
        self
    }

    /// Emit `RETURNSTATUS`.
    #[must_use]
    pub fn return_status(mut self, status: i32) -> Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// Emit `RETURNVALUE` for an output parameter.
    #[must_use]
    pub fn return_value(mut self, ordinal: u16, name: &str, type_info: TypeInfo, value: SqlValue) -> Self {
        self.buf.put_u8(TokenType::ReturnValue as u8);
        self.buf.put_u16_le(ordinal);
        encode_or_skip(write_b_varchar(&mut self.buf, name), "RETURNVALUE name");
        self.buf.put_u8(0x01);
        self.buf.put_u32_le(0);
        self.buf.put_u16_le(ColumnFlags::NULLABLE.bits());
        encode_or_skip(type_info.encode(&mut self.buf), "RETURNVALUE type");
        put_value(&mut self.buf, ValueMeta::new(&type_info), value);
        self
    }

    /// Append pre-encoded token bytes.
    #[must_use]
    pub fn raw(mut self, tokens: &[u8]) -> Self {
        self.buf.put_slice(tokens);
        self
    }

    /// Flush what is scripted so far and wait before continuing.
    #[must_use]
    pub fn pause(mut self, delay: Duration) -> Self {
        self.flush();
        self.steps.push(Step::Pause(delay));
        self
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            self.steps.push(Step::Tokens(self.buf.split().freeze()));
        }
    }

    pub(crate) fn into_steps(mut self) -> Vec<Step> {
        self.flush();
        self.steps
    }
}

fn message_token(number: i32, class: u8, message: String) -> ServerMessage {
    ServerMessage {
        number,
        state: 1,
        class,
        message,
        server: "MockServer".into(),
        procedure: String::new(),
        line: 1,
    }
}

fn put_value(dst: &mut BytesMut, meta: ValueMeta<'_>, value: SqlValue) {
    let meta = meta.with_policy(DateTimePolicy::default());
    match encode_param(value, &meta) {
        Ok(chunks) => chunks.iter().for_each(|chunk| dst.put_slice(chunk)),
        Err(e) => tracing::error!(error = %e, "cannot encode scripted value"),
    }
}

fn encode_or_skip<E: std::fmt::Display>(result: Result<(), E>, what: &str) {
    if let Err(e) = result {
        tracing::error!(error = %e, token = what, "cannot encode scripted token");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::{Parsed, Token, TokenParser};

    fn tokens(response: MockResponse) -> Vec<Token> {
        let mut parser = TokenParser::new();
        for step in response.into_steps() {
            if let Step::Tokens(bytes) = step {
                parser.extend(bytes);
            }
        }
        parser.finish();
        let mut metadata: Option<Arc<ColMetaData>> = None;
        let mut out = Vec::new();
        loop {
            match parser.next_token(metadata.as_deref()).unwrap() {
                Parsed::Token(Token::ColMetaData(columns)) => {
                    metadata = Some(Arc::clone(&columns));
                    out.push(Token::ColMetaData(columns));
                }
                Parsed::Token(token) => out.push(token),
                Parsed::Finished => return out,
                Parsed::NeedMoreData => panic!("truncated script"),
            }
        }
    }

    #[test]
    fn rows_script_parses_back() {
        let response = MockResponse::rows(
            vec![MockColumn::int("n"), MockColumn::nvarchar("s", 10)],
            vec![
                vec![SqlValue::Int(42), SqlValue::String("x".into())],
                vec![SqlValue::Null, SqlValue::Null],
            ],
        );
        let tokens = tokens(response);
        assert_eq!(tokens.len(), 4);
        let Token::Row(first) = &tokens[1] else { panic!("expected row") };
        assert_eq!(first.values[0].as_deref(), Some(&42i32.to_le_bytes()[..]));
        let Token::Row(second) = &tokens[2] else { panic!("expected row") };
        assert!(second.is_null(0) && second.is_null(1));
        let Token::Done(done) = &tokens[3] else { panic!("expected done") };
        assert_eq!(done.rows(), Some(2));
    }

    #[test]
    fn error_script_sets_the_error_bit() {
        let tokens = tokens(MockResponse::error(208, "Invalid object name 'x'."));
        let Token::Error(message) = &tokens[0] else { panic!("expected error") };
        assert_eq!(message.number, 208);
        let Token::Done(done) = &tokens[1] else { panic!("expected done") };
        assert!(done.is_error());
    }

    #[test]
    fn pauses_split_the_script() {
        let steps = MockResponse::new()
            .columns(vec![MockColumn::int("n")])
            .pause(Duration::from_millis(5))
            .row(vec![SqlValue::Int(1)])
            .done(1)
            .into_steps();
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[1], Step::Pause(_)));
    }

    #[test]
    fn return_value_and_status() {
        let tokens = tokens(
            MockResponse::new()
                .return_value(1, "@out", TypeInfo::new(TypeId::IntN).with_length(4), SqlValue::Int(7))
                .return_status(3)
                .done_proc(0),
        );
        let Token::ReturnValue(rv) = &tokens[0] else { panic!("expected return value") };
        assert_eq!(rv.name, "@out");
        assert_eq!(rv.value.as_deref(), Some(&7i32.to_le_bytes()[..]));
        assert!(matches!(tokens[1], Token::ReturnStatus(3)));
    }
}
