//! # Compiled Requests
//!
//! Requests are what the session hands to tasks: a compiled statement plus
//! its bindings. They are immutable and shared (`Arc`) between every task that
//! executes them.
//!
//! - [`QueryRequest`]: a SELECT with query bindings and a row shape
//! - [`PersistRequest`]: one DML statement with persist bindings

use crate::error::{Error, Result};
use crate::parameter::{PersistParameterBinding, QueryParameterBinding};
use crate::statement::SqlTemplate;
use crate::value::{Tuple, TypeMapping, Value};

// =============================================================================
// Query Request
// =============================================================================

/// A compiled query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    statement: SqlTemplate,
    parameter_bindings: Vec<QueryParameterBinding>,
    row_mapping: Vec<TypeMapping>,
}

impl QueryRequest {
    /// Creates a request whose result rows have one column per entry of
    /// `row_mapping`.
    pub fn new(
        statement: SqlTemplate,
        parameter_bindings: Vec<QueryParameterBinding>,
        row_mapping: Vec<TypeMapping>,
    ) -> Self {
        Self {
            statement,
            parameter_bindings,
            row_mapping,
        }
    }

    /// The compiled statement.
    pub fn compiled_statement(&self) -> &SqlTemplate {
        &self.statement
    }

    pub fn parameter_bindings(&self) -> &[QueryParameterBinding] {
        &self.parameter_bindings
    }

    /// Builds the accessor that turns driver rows into tuples.
    pub fn accessor(&self) -> RowAccessor {
        RowAccessor::new(self.row_mapping.clone())
    }
}

// =============================================================================
// Persist Request
// =============================================================================

/// A compiled DML statement.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    statement: SqlTemplate,
    parameter_bindings: Vec<PersistParameterBinding>,
}

impl PersistRequest {
    pub fn new(statement: SqlTemplate, parameter_bindings: Vec<PersistParameterBinding>) -> Self {
        Self {
            statement,
            parameter_bindings,
        }
    }

    pub fn compiled_statement(&self) -> &SqlTemplate {
        &self.statement
    }

    pub fn parameter_bindings(&self) -> &[PersistParameterBinding] {
        &self.parameter_bindings
    }
}

// =============================================================================
// Row Accessor
// =============================================================================

/// Reads one driver row into a [`Tuple`] using the request's type mappings.
#[derive(Debug, Clone)]
pub struct RowAccessor {
    mapping: Vec<TypeMapping>,
}

impl RowAccessor {
    pub fn new(mapping: Vec<TypeMapping>) -> Self {
        Self { mapping }
    }

    /// Converts raw driver values into a tuple.
    ///
    /// # Errors
    ///
    /// `Error::InvalidOperation` if the row width doesn't match the request's
    /// shape, `Error::TypeMismatch` if a column can't be read by its mapping.
    pub fn read(&self, raw: Vec<Value>) -> Result<Tuple> {
        if raw.len() != self.mapping.len() {
            return Err(Error::InvalidOperation(format!(
                "result row has {} columns, but the request expects {}",
                raw.len(),
                self.mapping.len()
            )));
        }
        let values = self
            .mapping
            .iter()
            .zip(raw)
            .map(|(mapping, value)| mapping.read_value(value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tuple::from_values(values))
    }
}
