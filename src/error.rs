//! # Error Handling for SpiteORM
//!
//! This module defines the error types used throughout the command execution
//! core. We use a single error enum ([`Error`]) to represent every failure
//! mode, which keeps processor signatures simple for the session layer that
//! sits above us.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! This provides:
//! - Automatic `Display` implementation from the `#[error(...)]` attributes
//! - Automatic `From` implementations from the `#[from]` attributes
//! - Proper error source chaining via `#[source]`
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Budget | Task needs more parameters than the provider allows | Split the work, never retry as is |
//! | Conflict | Validated persist touched zero rows | Re-read the entity and retry |
//! | Storage | Driver failed while executing or reading | Roll back the enclosing transaction |
//! | Misuse | Adding parts to a prepared command | Fix the caller |
//!
//! Nothing in this layer retries. "The task does not fit in this command" is
//! not an error at all; it only moves the task into the next batch.

use thiserror::Error;

use crate::parameter::{BindingId, BindingType};

/// Boxed error produced by drivers and parameter accessors.
///
/// Drivers are external collaborators, so we accept any error type they
/// produce and translate it at the [`Command`](crate::command::Command)
/// boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur while building or executing commands.
///
/// # Example
///
/// ```rust
/// use spiteorm::Error;
///
/// let err = Error::VersionConflict { entity_key: "Order(42)".to_string() };
/// assert_eq!(
///     err.to_string(),
///     "version of entity with key 'Order(42)' differs from the expected one"
/// );
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Permanent task failures
    // =========================================================================

    /// A single task needs more bound parameters than any command may carry.
    ///
    /// # When This Happens
    ///
    /// Providers cap the number of parameters per command (SQL Server: 2100,
    /// SQLite: 32766 by default). A task whose parts together exceed that cap
    /// can never be executed, no matter how the batch is arranged. This is
    /// raised while building parts, before any I/O.
    #[error("query parameters limit exceeded: task requires {required} parameters, but a command may carry at most {limit}")]
    ParametersLimitExceeded {
        /// Parameters the task needs
        required: usize,
        /// The provider's ceiling
        limit: usize,
    },

    /// A persist task asked for row-count validation and touched no rows.
    ///
    /// # Systems Concept: Optimistic Concurrency Control
    ///
    /// Updates and removals carry the version the session last saw in their
    /// WHERE clause. If someone else changed the row in between, the
    /// statement matches nothing and the affected-row count comes back zero.
    #[error("version of entity with key '{entity_key}' differs from the expected one")]
    VersionConflict {
        /// Key of the entity being persisted, for diagnostics
        entity_key: String,
    },

    // =========================================================================
    // Storage failures
    // =========================================================================

    /// The driver failed while executing a command or reading its results.
    ///
    /// Raw driver errors never leave [`Command`](crate::command::Command):
    /// the driver's exception builder turns them into this variant and
    /// attaches the human-readable command text.
    #[error("storage error: {message}\ncommand: {command_text}")]
    Storage {
        /// Description produced by the driver's exception builder
        message: String,
        /// The command text and parameters, for diagnostics
        command_text: String,
        /// The original driver error
        #[source]
        source: BoxError,
    },

    /// SQLite operation failed outside command execution (opening, pragmas).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // =========================================================================
    // Binding failures
    // =========================================================================

    /// A parameter accessor failed while resolving its value.
    #[error("unable to resolve value of parameter binding {binding}: {source}")]
    ParameterResolution {
        /// Identifier of the failing binding
        binding: BindingId,
        /// What the accessor reported
        #[source]
        source: BoxError,
    },

    /// A binding type reached a factory path that cannot handle it.
    #[error("binding type {binding_type:?} is not valid for {usage} requests")]
    UnexpectedBindingType {
        /// The offending binding type
        binding_type: BindingType,
        /// `"query"` or `"persist"`
        usage: &'static str,
    },

    /// A value did not match the type mapping it was bound or read with.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type expected by the mapping
        expected: &'static str,
        /// What the value actually was
        actual: String,
    },

    /// A type identifier binding named a type that has no registered id.
    #[error("type '{0}' has no registered type identifier")]
    UnknownType(String),

    // =========================================================================
    // Misuse (fix the caller)
    // =========================================================================

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An async operation observed cancellation before starting new I/O.
    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for failures that indicate a bug in the caller rather
    /// than a data or storage condition.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidOperation(_) | Error::UnexpectedBindingType { .. }
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
