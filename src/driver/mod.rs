//! # Storage Driver Abstraction
//!
//! The execution core never talks to a database directly. It consumes the
//! traits in this module, and a driver implements them for one backend.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Execution Core                           │
//! │   CommandFactory ──► Command ──► CommandProcessor            │
//! └──────────────┬───────────────────────────────────────────────┘
//!                │ StorageDriver / DriverCommand / DriverReader
//!                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   SqliteDriver (rusqlite)      │   any other backend         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync and Async Twins
//!
//! `DriverCommand` and `DriverReader` expose blocking methods plus async
//! twins. The async twins default to calling the blocking ones. Drivers that
//! can do better override them: the SQLite driver runs batches on the
//! blocking pool, a network driver would await its socket.
//!
//! ## Error Translation
//!
//! Driver methods return raw [`BoxError`]s. Only
//! [`Command`](crate::command::Command) calls them, and it always passes
//! failures through [`StorageDriver::build_exception`] together with the
//! human-readable command text.

use async_trait::async_trait;

use crate::config::ProviderInfo;
use crate::error::{BoxError, Error, Result};
use crate::value::Value;

pub mod sqlite;

pub use sqlite::SqliteDriver;

/// Result type of raw driver calls.
pub type DriverResult<T> = std::result::Result<T, BoxError>;

// =============================================================================
// Parameters
// =============================================================================

/// A named native parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

// =============================================================================
// Driver Traits
// =============================================================================

/// Entry point of a storage driver.
///
/// One driver instance serves one session: it owns (or shares) that session's
/// connection, so contexts of different sessions never share state.
pub trait StorageDriver: Send + Sync {
    /// What the provider can do.
    fn provider_info(&self) -> &ProviderInfo;

    /// Creates an empty native command.
    fn create_command(&self) -> Result<Box<dyn DriverCommand>>;

    /// Concatenates statements into one batch command text.
    fn build_batch(&self, statements: &[String]) -> String;

    /// The text that refers to parameter `name` inside a statement.
    fn build_parameter_reference(&self, name: &str) -> String;

    /// Creates an empty character large object.
    fn create_character_lob(&self) -> Result<Box<dyn LargeObject>>;

    /// Creates an empty binary large object.
    fn create_binary_lob(&self) -> Result<Box<dyn LargeObject>>;

    /// Translates a raw driver failure into a storage error.
    fn build_exception(&self, error: BoxError, command_text: &str) -> Error {
        Error::Storage {
            message: error.to_string(),
            command_text: command_text.to_string(),
            source: error,
        }
    }
}

/// A native command: text plus parameters.
#[async_trait]
pub trait DriverCommand: Send {
    fn set_command_text(&mut self, text: String);

    fn command_text(&self) -> &str;

    fn add_parameter(&mut self, parameter: Parameter);

    fn parameters(&self) -> &[Parameter];

    /// Executes the command, returning the number of affected rows.
    fn execute_non_query(&mut self) -> DriverResult<u64>;

    /// Executes the command, returning a reader positioned before the first
    /// row of the first result set.
    fn execute_reader(&mut self) -> DriverResult<Box<dyn DriverReader>>;

    async fn execute_non_query_async(&mut self) -> DriverResult<u64> {
        self.execute_non_query()
    }

    async fn execute_reader_async(&mut self) -> DriverResult<Box<dyn DriverReader>> {
        self.execute_reader()
    }

    /// Releases native resources. Called once, by `Command::dispose`.
    fn close(&mut self) {}
}

/// A forward-only cursor over one or more result sets.
///
/// Result sets appear in statement order; statements without a result
/// (DML) contribute none.
#[async_trait]
pub trait DriverReader: Send {
    /// Advances to the next row of the current result set.
    fn next_row(&mut self) -> DriverResult<bool>;

    /// Advances to the next result set.
    fn next_result(&mut self) -> DriverResult<bool>;

    /// Raw values of the current row.
    fn values(&self) -> DriverResult<Vec<Value>>;

    async fn next_row_async(&mut self) -> DriverResult<bool> {
        self.next_row()
    }

    async fn next_result_async(&mut self) -> DriverResult<bool> {
        self.next_result()
    }

    fn close(&mut self) {}
}

/// A driver-native large-object handle.
///
/// Values are written in blocks, then bound to a parameter. The handle must
/// outlive command execution, so it is kept as a command part resource and
/// disposed with the command.
pub trait LargeObject: Send {
    /// Appends a block of characters.
    fn write_chars(&mut self, chunk: &str) -> DriverResult<()>;

    /// Appends a block of bytes.
    fn write_bytes(&mut self, chunk: &[u8]) -> DriverResult<()>;

    /// Truncates the object to zero length.
    fn erase(&mut self) -> DriverResult<()>;

    /// Creates the parameter that carries this object.
    fn bind_to(&self, parameter_name: &str) -> Parameter;

    /// Releases the handle. Must be idempotent.
    fn dispose(&mut self);
}
