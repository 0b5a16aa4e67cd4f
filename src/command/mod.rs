//! # Commands
//!
//! A [`Command`] is one round-trip to the storage. It wraps exactly one
//! native [`DriverCommand`] and accumulates [`CommandPart`]s into it until it
//! is prepared:
//!
//! ```text
//!   add_part ──► add_part ──► prepare ──► execute ──► next_row / next_result ──► dispose
//!   (collect statements,       (build batch    (reader or
//!    parameters, resources)     text, once)     non-query)
//! ```
//!
//! ## Invariants
//!
//! - Once prepared, no more parts may be added
//! - Preparing without parts is an error
//! - Every driver failure is translated by the driver's exception builder and
//!   carries the human-readable command text
//! - Reader, resources and native command are released together, exactly
//!   once, in that order

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::driver::{DriverCommand, DriverReader, StorageDriver};
use crate::error::{BoxError, Error, Result};
use crate::mode::ExecutionMode;
use crate::request::RowAccessor;
use crate::value::Tuple;

mod factory;
mod part;

pub use factory::{CommandFactory, TypeIdRegistry, LOB_BLOCK_SIZE};
pub use part::{CommandPart, DisposableSet};

/// One native command being assembled or executed.
pub struct Command {
    driver: Arc<dyn StorageDriver>,
    underlying: Box<dyn DriverCommand>,
    statements: Vec<String>,
    resources: Option<DisposableSet>,
    reader: Option<Box<dyn DriverReader>>,
    prepared: bool,
    disposed: bool,
}

impl Command {
    pub(crate) fn new(driver: Arc<dyn StorageDriver>, underlying: Box<dyn DriverCommand>) -> Self {
        Self {
            driver,
            underlying,
            statements: Vec::new(),
            resources: None,
            reader: None,
            prepared: false,
            disposed: false,
        }
    }

    /// Number of parts added so far.
    pub fn count(&self) -> usize {
        self.statements.len()
    }

    /// Number of parameters bound so far.
    pub fn parameter_count(&self) -> usize {
        self.underlying.parameters().len()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Appends a part's statement, parameters and resources.
    pub fn add_part(&mut self, part: CommandPart) -> Result<()> {
        if self.prepared {
            return Err(Error::InvalidOperation(
                "unable to change command: it is already prepared".to_string(),
            ));
        }
        let CommandPart {
            statement,
            parameters,
            resources,
        } = part;
        trace!(parameters = parameters.len(), "adding command part");

        self.statements.push(statement);
        for parameter in parameters {
            self.underlying.add_parameter(parameter);
        }
        if !resources.is_empty() {
            self.resources
                .get_or_insert_with(DisposableSet::new)
                .extend(resources);
        }
        Ok(())
    }

    /// Builds the batch command text. Later calls do nothing.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        if self.statements.is_empty() {
            return Err(Error::InvalidOperation(
                "unable to prepare command: no parts registered".to_string(),
            ));
        }
        self.prepared = true;
        let text = self.driver.build_batch(&self.statements);
        self.underlying.set_command_text(text);
        Ok(())
    }

    fn translate(&self, error: BoxError) -> Error {
        self.driver.build_exception(error, &self.to_human_readable_string())
    }

    fn log_execution(&self, kind: &'static str) {
        debug!(
            kind,
            statements = self.statements.len(),
            parameters = self.parameter_count(),
            "executing command"
        );
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Executes as a non-query, returning the affected-row count.
    pub fn execute_non_query(&mut self) -> Result<u64> {
        self.prepare()?;
        self.log_execution("non-query");
        let result = self.underlying.execute_non_query();
        result.map_err(|e| self.translate(e))
    }

    /// Executes and keeps the reader open on this command.
    pub fn execute_reader(&mut self) -> Result<()> {
        self.prepare()?;
        self.log_execution("reader");
        let result = self.underlying.execute_reader();
        self.reader = Some(result.map_err(|e| self.translate(e))?);
        Ok(())
    }

    pub async fn execute_non_query_async(&mut self, token: &CancellationToken) -> Result<u64> {
        ExecutionMode::Async(token).ensure_not_cancelled()?;
        self.prepare()?;
        self.log_execution("non-query");
        let result = self.underlying.execute_non_query_async().await;
        result.map_err(|e| self.translate(e))
    }

    pub async fn execute_reader_async(&mut self, token: &CancellationToken) -> Result<()> {
        ExecutionMode::Async(token).ensure_not_cancelled()?;
        self.prepare()?;
        self.log_execution("reader");
        let result = self.underlying.execute_reader_async().await;
        self.reader = Some(result.map_err(|e| self.translate(e))?);
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    fn open_reader(&mut self) -> Result<&mut Box<dyn DriverReader>> {
        self.reader
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("command has no open reader".to_string()))
    }

    /// Advances to the next result set.
    pub fn next_result(&mut self) -> Result<bool> {
        let result = self.open_reader()?.next_result();
        result.map_err(|e| self.translate(e))
    }

    /// Advances to the next row of the current result set.
    pub fn next_row(&mut self) -> Result<bool> {
        let result = self.open_reader()?.next_row();
        result.map_err(|e| self.translate(e))
    }

    pub async fn next_result_async(&mut self, token: &CancellationToken) -> Result<bool> {
        ExecutionMode::Async(token).ensure_not_cancelled()?;
        let result = self.open_reader()?.next_result_async().await;
        result.map_err(|e| self.translate(e))
    }

    pub async fn next_row_async(&mut self, token: &CancellationToken) -> Result<bool> {
        ExecutionMode::Async(token).ensure_not_cancelled()?;
        let result = self.open_reader()?.next_row_async().await;
        result.map_err(|e| self.translate(e))
    }

    /// Reads the current row.
    pub fn read_tuple_with(&mut self, accessor: &RowAccessor) -> Result<Tuple> {
        let values = self.open_reader()?.values();
        let values = values.map_err(|e| self.translate(e))?;
        accessor.read(values)
    }

    // Mode-parameterised forms used by the processors.

    pub(crate) async fn execute_non_query_in(&mut self, mode: ExecutionMode<'_>) -> Result<u64> {
        match mode {
            ExecutionMode::Blocking => self.execute_non_query(),
            ExecutionMode::Async(token) => self.execute_non_query_async(token).await,
        }
    }

    pub(crate) async fn execute_reader_in(&mut self, mode: ExecutionMode<'_>) -> Result<()> {
        match mode {
            ExecutionMode::Blocking => self.execute_reader(),
            ExecutionMode::Async(token) => self.execute_reader_async(token).await,
        }
    }

    pub(crate) async fn next_row_in(&mut self, mode: ExecutionMode<'_>) -> Result<bool> {
        match mode {
            ExecutionMode::Blocking => self.next_row(),
            ExecutionMode::Async(token) => self.next_row_async(token).await,
        }
    }

    pub(crate) async fn next_result_in(&mut self, mode: ExecutionMode<'_>) -> Result<bool> {
        match mode {
            ExecutionMode::Blocking => self.next_result(),
            ExecutionMode::Async(token) => self.next_result_async(token).await,
        }
    }

    // =========================================================================
    // Diagnostics and Disposal
    // =========================================================================

    /// Command text followed by every parameter and its value.
    pub fn to_human_readable_string(&self) -> String {
        let text = if self.prepared {
            self.underlying.command_text().to_string()
        } else {
            self.driver.build_batch(&self.statements)
        };
        let parameters = self.underlying.parameters();
        if parameters.is_empty() {
            return text;
        }
        let listed: Vec<String> = parameters
            .iter()
            .map(|p| format!("{} = {}", self.driver.build_parameter_reference(p.name()), p.value()))
            .collect();
        format!("{text}\n[{}]", listed.join(", "))
    }

    /// Releases reader, resources and native command. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
        if let Some(mut resources) = self.resources.take() {
            resources.dispose();
        }
        self.underlying.close();
    }

    /// Async twin of [`dispose`](Self::dispose).
    pub async fn dispose_async(&mut self) {
        self.dispose();
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("statements", &self.statements.len())
            .field("parameters", &self.parameter_count())
            .field("prepared", &self.prepared)
            .field("disposed", &self.disposed)
            .finish()
    }
}
