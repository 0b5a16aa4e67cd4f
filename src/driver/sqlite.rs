//! # SQLite Driver
//!
//! A [`StorageDriver`] over `rusqlite`. SQLite is embedded, so "round-trips"
//! are function calls, but the batching contract is the same as for a network
//! server:
//!
//! - a batch command is the statements joined with `;`
//! - statements run in order; each SELECT contributes one result set
//! - parameters are named (`@p0_1`) so every statement of the batch binds
//!   only the parameters it mentions
//! - the affected-row count of a non-query is the sum over its statements
//!
//! ## The SQLite Challenge
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, and statements borrow the
//! connection. We keep the connection behind `Arc<parking_lot::Mutex<_>>`
//! and run a whole batch under one lock. Result sets are buffered per
//! execution, which lets the reader outlive the lock; the execution core above
//! still consumes them one row at a time.
//!
//! The async twins move the batch onto tokio's blocking pool with
//! `spawn_blocking`, so they must be awaited inside a tokio runtime.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Batch, Connection};

use crate::config::{ProviderInfo, SQLITE_MAX_QUERY_PARAMETER_COUNT};
use crate::driver::{DriverCommand, DriverReader, DriverResult, LargeObject, Parameter, StorageDriver};
use crate::error::{BoxError, Error, Result};
use crate::value::Value;

// =============================================================================
// Value Conversion
// =============================================================================

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Boolean(v) => ToSqlOutput::Owned(SqlValue::Integer(*v as i64)),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> DriverResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(std::str::from_utf8(v)?.to_string()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    })
}

// =============================================================================
// Driver
// =============================================================================

/// SQLite storage driver. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
    provider_info: ProviderInfo,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("provider_info", &self.provider_info)
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Opens (or creates) a database file.
    ///
    /// # Pragmas
    ///
    /// - `journal_mode = WAL`: readers don't block the writer
    /// - `synchronous = NORMAL`: sync the WAL on commit only
    /// - `foreign_keys = ON`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self::from_connection(conn))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            provider_info: ProviderInfo::default()
                .with_max_query_parameter_count(Some(SQLITE_MAX_QUERY_PARAMETER_COUNT)),
        }
    }

    /// Overrides the reported provider capabilities.
    pub fn with_provider_info(mut self, provider_info: ProviderInfo) -> Self {
        self.provider_info = provider_info;
        self
    }

    /// Runs SQL outside the execution core (schema setup, seeding).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Gives direct access to the connection.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.conn.lock())
    }
}

impl StorageDriver for SqliteDriver {
    fn provider_info(&self) -> &ProviderInfo {
        &self.provider_info
    }

    fn create_command(&self) -> Result<Box<dyn DriverCommand>> {
        Ok(Box::new(SqliteCommand {
            conn: Arc::clone(&self.conn),
            text: String::new(),
            parameters: Vec::new(),
        }))
    }

    fn build_batch(&self, statements: &[String]) -> String {
        statements
            .iter()
            .map(|s| s.trim_end().trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join(";\n")
    }

    fn build_parameter_reference(&self, name: &str) -> String {
        format!("@{name}")
    }

    fn create_character_lob(&self) -> Result<Box<dyn LargeObject>> {
        Ok(Box::new(SqliteLob::new(LobKind::Character)))
    }

    fn create_binary_lob(&self) -> Result<Box<dyn LargeObject>> {
        Ok(Box::new(SqliteLob::new(LobKind::Binary)))
    }

    fn build_exception(&self, error: BoxError, command_text: &str) -> Error {
        let message = match error.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(code, Some(detail))) => {
                format!("{:?}: {}", code.code, detail)
            }
            _ => error.to_string(),
        };
        Error::Storage {
            message,
            command_text: command_text.to_string(),
            source: error,
        }
    }
}

// =============================================================================
// Command
// =============================================================================

type ResultSet = Vec<Vec<Value>>;

struct SqliteCommand {
    conn: Arc<Mutex<Connection>>,
    text: String,
    parameters: Vec<Parameter>,
}

/// Runs every statement of the batch in order.
///
/// Returns the summed affected-row count of statements without columns and
/// one buffered result set per statement with columns.
fn run_batch(conn: &Mutex<Connection>, text: &str, parameters: &[Parameter]) -> DriverResult<(u64, Vec<ResultSet>)> {
    let conn = conn.lock();
    let bound: HashMap<&str, &Value> = parameters
        .iter()
        .map(|p| (p.name(), p.value()))
        .collect();

    let mut affected = 0u64;
    let mut result_sets = Vec::new();
    let mut batch = Batch::new(&conn, text);

    while let Some(mut stmt) = batch.next()? {
        for index in 1..=stmt.parameter_count() {
            let name = stmt
                .parameter_name(index)
                .map(str::to_owned)
                .ok_or_else(|| -> BoxError {
                    format!("positional parameter ?{index} is not supported").into()
                })?;
            // Strip the sigil: "@p0_1" is bound as "p0_1".
            let value = bound.get(&name[1..]).ok_or_else(|| -> BoxError {
                format!("parameter '{name}' is not bound").into()
            })?;
            stmt.raw_bind_parameter(index, *value)?;
        }

        let width = stmt.column_count();
        if width == 0 {
            affected += stmt.raw_execute()? as u64;
            continue;
        }

        let mut set = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for column in 0..width {
                values.push(read_value(row.get_ref(column)?)?);
            }
            set.push(values);
        }
        result_sets.push(set);
    }

    Ok((affected, result_sets))
}

impl SqliteCommand {
    fn run(&self) -> DriverResult<(u64, Vec<ResultSet>)> {
        run_batch(&self.conn, &self.text, &self.parameters)
    }

    /// Runs the batch on tokio's blocking pool.
    async fn run_async(&self) -> DriverResult<(u64, Vec<ResultSet>)> {
        let conn = Arc::clone(&self.conn);
        let text = self.text.clone();
        let parameters = self.parameters.clone();
        tokio::task::spawn_blocking(move || run_batch(&conn, &text, &parameters)).await?
    }
}

#[async_trait]
impl DriverCommand for SqliteCommand {
    fn set_command_text(&mut self, text: String) {
        self.text = text;
    }

    fn command_text(&self) -> &str {
        &self.text
    }

    fn add_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn execute_non_query(&mut self) -> DriverResult<u64> {
        let (affected, _) = self.run()?;
        Ok(affected)
    }

    fn execute_reader(&mut self) -> DriverResult<Box<dyn DriverReader>> {
        let (_, result_sets) = self.run()?;
        Ok(Box::new(SqliteReader::new(result_sets)))
    }

    async fn execute_non_query_async(&mut self) -> DriverResult<u64> {
        let (affected, _) = self.run_async().await?;
        Ok(affected)
    }

    async fn execute_reader_async(&mut self) -> DriverResult<Box<dyn DriverReader>> {
        let (_, result_sets) = self.run_async().await?;
        Ok(Box::new(SqliteReader::new(result_sets)))
    }
}

// =============================================================================
// Reader
// =============================================================================

struct SqliteReader {
    pending: VecDeque<ResultSet>,
    current_set: Option<std::vec::IntoIter<Vec<Value>>>,
    current_row: Option<Vec<Value>>,
}

impl SqliteReader {
    fn new(result_sets: Vec<ResultSet>) -> Self {
        let mut pending: VecDeque<ResultSet> = result_sets.into();
        let current_set = pending.pop_front().map(Vec::into_iter);
        Self {
            pending,
            current_set,
            current_row: None,
        }
    }
}

impl DriverReader for SqliteReader {
    fn next_row(&mut self) -> DriverResult<bool> {
        self.current_row = self.current_set.as_mut().and_then(Iterator::next);
        Ok(self.current_row.is_some())
    }

    fn next_result(&mut self) -> DriverResult<bool> {
        self.current_row = None;
        self.current_set = self.pending.pop_front().map(Vec::into_iter);
        Ok(self.current_set.is_some())
    }

    fn values(&self) -> DriverResult<Vec<Value>> {
        self.current_row
            .clone()
            .ok_or_else(|| "reader is not positioned on a row".into())
    }

    fn close(&mut self) {
        self.pending.clear();
        self.current_set = None;
        self.current_row = None;
    }
}

// =============================================================================
// Large Objects
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LobKind {
    Character,
    Binary,
}

/// SQLite has no server-side LOB handles; the value is assembled in memory
/// and bound as TEXT or BLOB.
struct SqliteLob {
    kind: LobKind,
    chars: String,
    bytes: Vec<u8>,
    disposed: bool,
}

impl SqliteLob {
    fn new(kind: LobKind) -> Self {
        Self {
            kind,
            chars: String::new(),
            bytes: Vec::new(),
            disposed: false,
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.disposed {
            return Err("large object is disposed".into());
        }
        Ok(())
    }
}

impl LargeObject for SqliteLob {
    fn write_chars(&mut self, chunk: &str) -> DriverResult<()> {
        self.ensure_open()?;
        if self.kind != LobKind::Character {
            return Err("cannot write characters into a binary large object".into());
        }
        self.chars.push_str(chunk);
        Ok(())
    }

    fn write_bytes(&mut self, chunk: &[u8]) -> DriverResult<()> {
        self.ensure_open()?;
        if self.kind != LobKind::Binary {
            return Err("cannot write bytes into a character large object".into());
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn erase(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.chars.clear();
        self.bytes.clear();
        Ok(())
    }

    fn bind_to(&self, parameter_name: &str) -> Parameter {
        let value = match self.kind {
            LobKind::Character => Value::Text(self.chars.clone()),
            LobKind::Binary => Value::Blob(self.bytes.clone()),
        };
        Parameter::new(parameter_name, value)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.chars = String::new();
        self.bytes = Vec::new();
    }
}
