//! Bulk load (BCP) support.
//!
//! A bulk load is two requests. An `INSERT BULK` statement tells the server
//! which columns follow, then a BulkLoad message (packet type 0x07) carries a
//! `COLMETADATA` token, one `ROW` token per row and a final `DONE`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mssql_client::{BulkColumn, BulkLoad, BulkOptions, SortOrder};
//! use tds_protocol::{TypeId, TypeInfo};
//!
//! let mut bulk = BulkLoad::new("dbo.Users", BulkOptions::new().table_lock(true));
//! bulk.add_column(BulkColumn::new("id", TypeInfo::new(TypeId::IntN).with_length(4)).nullable(false))?;
//! bulk.add_column(BulkColumn::new("name", TypeInfo::new(TypeId::NVarChar).with_length(100)))?;
//!
//! let rows = users.iter().map(|u| vec![SqlValue::Int(u.id), SqlValue::from(u.name.as_str())]);
//! let outcome = client.bulk_load(&mut bulk, rows).await?;
//! println!("Inserted {} rows", outcome.rows_affected);
//! ```
//!
//! Rows are pulled from the caller's iterator while packets are written, so
//! a load never holds more than one row in memory.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::{SqlValue, TypeError, ValueMeta, data_type};
use tds_protocol::{ColMetaData, ColumnData, ColumnFlags, Done, TokenType, TypeInfo};

use crate::error::{Error, Result};

/// Direction of an `ORDER` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(Error::Contract(format!(
                "order direction must be either \"ASC\" or \"DESC\", got {other:?}"
            ))),
        }
    }
}

/// Hints for the `INSERT BULK` statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct BulkOptions {
    /// Check table constraints during the load.
    pub check_constraints: bool,
    /// Fire insert triggers.
    pub fire_triggers: bool,
    /// Keep NULLs instead of applying column defaults.
    pub keep_nulls: bool,
    /// Take a table-level lock for the duration of the load.
    pub table_lock: bool,
    /// Sort order of the incoming rows.
    pub order: Vec<(String, SortOrder)>,
}

impl BulkOptions {
    /// No hints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check constraints.
    #[must_use]
    pub fn check_constraints(mut self, on: bool) -> Self {
        self.check_constraints = on;
        self
    }

    /// Fire triggers.
    #[must_use]
    pub fn fire_triggers(mut self, on: bool) -> Self {
        self.fire_triggers = on;
        self
    }

    /// Keep NULLs.
    #[must_use]
    pub fn keep_nulls(mut self, on: bool) -> Self {
        self.keep_nulls = on;
        self
    }

    /// Lock the table.
    #[must_use]
    pub fn table_lock(mut self, on: bool) -> Self {
        self.table_lock = on;
        self
    }

    /// Declare that rows arrive sorted by `column`.
    #[must_use]
    pub fn order(mut self, column: impl Into<String>, direction: SortOrder) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    fn to_sql(&self) -> String {
        let mut hints = Vec::new();
        if self.check_constraints {
            hints.push("CHECK_CONSTRAINTS".to_owned());
        }
        if self.fire_triggers {
            hints.push("FIRE_TRIGGERS".to_owned());
        }
        if self.keep_nulls {
            hints.push("KEEP_NULLS".to_owned());
        }
        if self.table_lock {
            hints.push("TABLOCK".to_owned());
        }
        if !self.order.is_empty() {
            let columns: Vec<String> = self
                .order
                .iter()
                .map(|(column, direction)| format!("{column} {}", direction.as_sql()))
                .collect();
            hints.push(format!("ORDER ({})", columns.join(", ")));
        }
        if hints.is_empty() {
            String::new()
        } else {
            format!(" WITH ({})", hints.join(","))
        }
    }
}

/// One destination column.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkColumn {
    /// Column name in the destination table.
    pub name: String,
    /// Key used to find the value in a [`BulkRow::Named`] row.
    pub obj_name: String,
    /// Wire type of the column.
    pub type_info: TypeInfo,
    /// Declared nullability; `None` leaves it unknown.
    pub nullable: Option<bool>,
}

impl BulkColumn {
    /// Column `name` of type `type_info`, looked up by the same name.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        let name = name.into();
        Self {
            obj_name: name.clone(),
            name,
            type_info,
            nullable: None,
        }
    }

    /// Declare nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Look the value up under `key` in named rows.
    #[must_use]
    pub fn obj_name(mut self, key: impl Into<String>) -> Self {
        self.obj_name = key.into();
        self
    }

    fn declaration(&self) -> String {
        data_type(self.type_info.type_id).declaration(&self.type_info)
    }

    fn flags(&self) -> ColumnFlags {
        ColumnFlags::UPDATEABLE_READ_WRITE
            | match self.nullable {
                Some(true) => ColumnFlags::NULLABLE,
                Some(false) => ColumnFlags::empty(),
                None => ColumnFlags::NULLABLE_UNKNOWN,
            }
    }
}

/// A row to load.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkRow {
    /// Values in column order.
    Positional(Vec<SqlValue>),
    /// Values keyed by each column's `obj_name`; absent keys are NULL.
    Named(HashMap<String, SqlValue>),
}

impl From<Vec<SqlValue>> for BulkRow {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::Positional(values)
    }
}

impl From<HashMap<String, SqlValue>> for BulkRow {
    fn from(values: HashMap<String, SqlValue>) -> Self {
        Self::Named(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Executing,
    RowsWritten,
}

/// A bulk load into one table.
///
/// Columns may only be added before execution starts; afterwards the list is
/// frozen and [`add_column`](Self::add_column) fails without changing it.
pub struct BulkLoad {
    table: String,
    columns: Vec<BulkColumn>,
    options: BulkOptions,
    phase: Phase,
}

impl BulkLoad {
    /// Load into `table` with `options`.
    pub fn new(table: impl Into<String>, options: BulkOptions) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            options,
            phase: Phase::Open,
        }
    }

    /// Destination table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in load order.
    #[must_use]
    pub fn columns(&self) -> &[BulkColumn] {
        &self.columns
    }

    /// Statement hints.
    #[must_use]
    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Append a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Contract`] once execution has started or a row has
    /// been written.
    pub fn add_column(&mut self, column: BulkColumn) -> Result<()> {
        match self.phase {
            Phase::Open => {
                self.columns.push(column);
                Ok(())
            }
            Phase::Executing => Err(Error::Contract(
                "columns cannot be added to a bulk load after execution has started".into(),
            )),
            Phase::RowsWritten => Err(Error::Contract(
                "columns cannot be added to a bulk load after the first row has been written".into(),
            )),
        }
    }

    /// The `INSERT BULK` statement announcing the columns.
    #[must_use]
    pub fn insert_bulk_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("[{}] {}", c.name, c.declaration()))
            .collect();
        format!("insert bulk {}({}){}", self.table, columns.join(", "), self.options.to_sql())
    }

    /// A `CREATE TABLE` statement matching the columns, handy for loading
    /// into temporary tables.
    #[must_use]
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut column = format!("[{}] {}", c.name, c.declaration());
                match c.nullable {
                    Some(true) => column.push_str(" NULL"),
                    Some(false) => column.push_str(" NOT NULL"),
                    None => {}
                }
                column
            })
            .collect();
        format!("CREATE TABLE {}(\n{}\n)", self.table, columns.join(",\n"))
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Contract("bulk load has no columns".into()));
        }
        if self.phase == Phase::Open {
            self.phase = Phase::Executing;
        }
        Ok(())
    }

    fn metadata(&self) -> ColMetaData {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut column = ColumnData::new(c.name.clone(), c.type_info.clone());
                column.flags = c.flags();
                if c.type_info.type_id.is_legacy_lob() {
                    column.table_name = Some(vec![self.table.clone()]);
                }
                column
            })
            .collect();
        ColMetaData { columns }
    }

    /// Encode the BulkLoad message body lazily from `rows`.
    pub fn encode<I>(&mut self, rows: I) -> BulkPayload<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: Into<BulkRow>,
    {
        BulkPayload {
            bulk: self,
            rows: rows.into_iter(),
            pending: VecDeque::new(),
            stage: Stage::Metadata,
            rows_written: 0,
        }
    }
}

impl fmt::Debug for BulkLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkLoad")
            .field("table", &self.table)
            .field("columns", &self.columns.len())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Metadata,
    Rows,
    Done,
}

/// Lazy producer of the BulkLoad message body.
///
/// Yields `COLMETADATA`, then the chunks of each row as it is pulled from
/// the row source, then `DONE`. The first row is validated against the
/// column types; later rows are encoded directly. After an error the
/// iterator is exhausted.
pub struct BulkPayload<'a, R> {
    bulk: &'a mut BulkLoad,
    rows: R,
    pending: VecDeque<Bytes>,
    stage: Stage,
    rows_written: u64,
}

impl<R> BulkPayload<'_, R>
where
    R: Iterator,
    R::Item: Into<BulkRow>,
{
    /// Rows encoded so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn metadata(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.bulk.metadata().encode(&mut buf)?;
        Ok(buf.freeze())
    }

    fn encode_row(&mut self, row: BulkRow) -> Result<()> {
        let validate = self.rows_written == 0;
        let columns = &self.bulk.columns;
        let mut values = match row {
            BulkRow::Positional(values) if values.len() == columns.len() => values,
            BulkRow::Positional(values) => {
                return Err(Error::Contract(format!(
                    "row has {} values, bulk load has {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            BulkRow::Named(mut named) => columns
                .iter()
                .map(|c| named.remove(&c.obj_name).unwrap_or(SqlValue::Null))
                .collect(),
        };

        let mut row_token = BytesMut::with_capacity(1);
        row_token.put_u8(TokenType::Row as u8);
        self.pending.push_back(row_token.freeze());

        for (column, value) in columns.iter().zip(values.drain(..)) {
            let codec = data_type(column.type_info.type_id);
            let meta = ValueMeta::new(&column.type_info).in_row();
            if value.is_null() && column.nullable == Some(false) {
                return Err(TypeError::NullNotAllowed(codec.name()).into());
            }
            let value = if validate { codec.validate(value, &meta)? } else { value };
            self.pending.extend(codec.encode_value(&value, &meta)?);
        }
        self.rows_written += 1;
        Ok(())
    }
}

impl<R> Iterator for BulkPayload<'_, R>
where
    R: Iterator,
    R::Item: Into<BulkRow>,
{
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Result<Bytes>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            match self.stage {
                Stage::Metadata => {
                    self.stage = Stage::Rows;
                    match self.metadata() {
                        Ok(chunk) => return Some(Ok(chunk)),
                        Err(e) => {
                            self.stage = Stage::Done;
                            return Some(Err(e));
                        }
                    }
                }
                Stage::Rows => match self.rows.next() {
                    Some(row) => {
                        self.bulk.phase = Phase::RowsWritten;
                        if let Err(e) = self.encode_row(row.into()) {
                            self.pending.clear();
                            self.stage = Stage::Done;
                            return Some(Err(e));
                        }
                    }
                    None => {
                        self.stage = Stage::Done;
                        let mut buf = BytesMut::with_capacity(1 + Done::SIZE);
                        Done::finished().encode(TokenType::Done, &mut buf);
                        return Some(Ok(buf.freeze()));
                    }
                },
                Stage::Done => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::{Parsed, Token, TokenParser, TypeId};

    fn int_column(name: &str) -> BulkColumn {
        BulkColumn::new(name, TypeInfo::new(TypeId::IntN).with_length(4))
    }

    fn sample() -> BulkLoad {
        let mut bulk = BulkLoad::new("#load", BulkOptions::new());
        bulk.add_column(int_column("id").nullable(false)).unwrap();
        bulk.add_column(
            BulkColumn::new("name", TypeInfo::new(TypeId::NVarChar).with_length(100))
                .nullable(true)
                .obj_name("label"),
        )
        .unwrap();
        bulk
    }

    fn payload(bulk: &mut BulkLoad, rows: Vec<BulkRow>) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in bulk.encode(rows) {
            out.extend_from_slice(&chunk.unwrap());
        }
        out.freeze()
    }

    #[test]
    fn insert_bulk_statement() {
        let mut bulk = sample();
        bulk.options = BulkOptions::new()
            .check_constraints(true)
            .keep_nulls(true)
            .table_lock(true)
            .order("id", SortOrder::Asc)
            .order("name", SortOrder::Desc);
        assert_eq!(
            bulk.insert_bulk_sql(),
            "insert bulk #load([id] int, [name] nvarchar(50)) \
             WITH (CHECK_CONSTRAINTS,KEEP_NULLS,TABLOCK,ORDER (id ASC, name DESC))"
        );
    }

    #[test]
    fn create_table_statement() {
        let mut bulk = sample();
        bulk.add_column(int_column("extra")).unwrap();
        assert_eq!(
            bulk.create_table_sql(),
            "CREATE TABLE #load(\n[id] int NOT NULL,\n[name] nvarchar(50) NULL,\n[extra] int\n)"
        );
    }

    #[test]
    fn order_direction_parsing() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!(matches!("asc".parse::<SortOrder>(), Err(Error::Contract(_))));
        assert!("UP".parse::<SortOrder>().is_err());
    }

    #[test]
    fn columns_freeze_once_execution_starts() {
        let mut bulk = sample();
        bulk.start().unwrap();
        let err = bulk.add_column(int_column("late")).unwrap_err();
        assert!(err.to_string().contains("execution has started"));
        assert_eq!(bulk.columns().len(), 2);

        let mut bulk = sample();
        let mut payload = bulk.encode(vec![vec![SqlValue::Int(1), SqlValue::Null]]);
        payload.next().unwrap().unwrap();
        payload.next().unwrap().unwrap();
        drop(payload);
        let err = bulk.add_column(int_column("late")).unwrap_err();
        assert!(err.to_string().contains("first row"));
        assert_eq!(bulk.columns().len(), 2);
    }

    #[test]
    fn empty_bulk_load_is_rejected() {
        let mut bulk = BulkLoad::new("t", BulkOptions::new());
        assert!(matches!(bulk.start(), Err(Error::Contract(_))));
    }

    #[test]
    fn three_rows_with_a_null() {
        let mut bulk = sample();
        let rows = vec![
            BulkRow::from(vec![SqlValue::Int(1), SqlValue::from("a")]),
            BulkRow::from(vec![SqlValue::Int(2), SqlValue::Null]),
            BulkRow::from(HashMap::from([
                ("id".to_owned(), SqlValue::Int(3)),
                ("label".to_owned(), SqlValue::from("c")),
            ])),
        ];
        let body = payload(&mut bulk, rows);

        let mut parser = TokenParser::from_message(body);
        let Parsed::Token(Token::ColMetaData(metadata)) = parser.next_token(None).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(metadata.columns.len(), 2);
        assert!(!metadata.columns[0].is_nullable());
        assert!(metadata.columns[1].is_nullable());
        assert!(metadata.columns[0].flags.contains(ColumnFlags::UPDATEABLE_READ_WRITE));

        let mut rows = Vec::new();
        loop {
            match parser.next_token(Some(&metadata)).unwrap() {
                Parsed::Token(Token::Row(row)) => rows.push(row),
                Parsed::Token(Token::Done(done)) => {
                    assert_eq!(done, Done::finished());
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(rows.len(), 3);
        assert!(rows[1].is_null(1));
        assert_eq!(&rows[2].values[0].as_ref().unwrap()[..], &3i32.to_le_bytes());
        assert_eq!(&rows[2].values[1].as_ref().unwrap()[..], &[b'c', 0]);
        assert_eq!(parser.next_token(None).unwrap(), Parsed::Finished);
    }

    #[test]
    fn first_row_is_validated() {
        let mut bulk = sample();
        let mut payload = bulk.encode(vec![vec![SqlValue::from("not a number"), SqlValue::Null]]);
        assert!(payload.next().unwrap().is_ok());
        assert!(matches!(payload.next(), Some(Err(Error::Type(_)))));
        assert!(payload.next().is_none());
    }

    #[test]
    fn null_in_not_null_column() {
        let mut bulk = sample();
        let results: Vec<_> = bulk.encode(vec![vec![SqlValue::Null, SqlValue::Null]]).collect();
        assert!(matches!(
            results.last(),
            Some(Err(Error::Type(TypeError::NullNotAllowed(_))))
        ));
    }

    #[test]
    fn row_width_mismatch() {
        let mut bulk = sample();
        let results: Vec<_> = bulk.encode(vec![vec![SqlValue::Int(1)]]).collect();
        assert!(matches!(results.last(), Some(Err(Error::Contract(_)))));
    }

    #[test]
    fn no_rows_still_sends_metadata_and_done() {
        let mut bulk = sample();
        let chunks: Vec<Bytes> = bulk.encode(Vec::<BulkRow>::new()).map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1][0], TokenType::Done as u8);
    }
}
