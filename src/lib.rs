//! # SpiteORM - Command Execution Core
//!
//! SpiteORM is the layer of an object-relational mapper that talks to the
//! database. The session hands it logical work (load these rows, persist that
//! entity) and it turns that work into as few round-trips as the provider
//! allows:
//!
//! - **Batching**: many tasks share one command, bounded by a batch size
//! - **Parameter budgets**: commands never exceed the provider's bound
//!   parameter ceiling; tasks that don't fit roll over to the next batch
//! - **Result correlation**: result sets stream back into the load tasks that
//!   produced them, in registration order
//! - **Optimistic concurrency**: validated persists run standalone and fail
//!   with a version conflict when they touch no rows
//! - **Sync and async**: every operation has an async twin driven by the
//!   same code path, cancellable through a `CancellationToken`
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Session                                │
//! │          register_task / execute_tasks[_with_reader]            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Command Processor                           │
//! │        Simple (one task per command) │ Batching                 │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌─────────────────────┐ │
//! │  │  SqlTask    │  │ CommandFactory  │  │ CommandProcessor-   │ │
//! │  │ Load/Persist│  │ bindings → part │  │ Context (per call)  │ │
//! │  └─────────────┘  └─────────────────┘  └─────────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ Command (parts → one batch)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Storage Driver                             │
//! │                 (SQLite via rusqlite, or any)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Ordering**: parts enter a command in task registration order, and
//!    load results are read back in that order
//! 2. **Atomic tasks**: the parts of one persist task are never split across
//!    commands
//! 3. **Budget**: no command carries more parameters than the provider allows
//! 4. **Cleanup**: commands, readers and large objects are disposed exactly
//!    once on every exit path
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use spiteorm::driver::SqliteDriver;
//! use spiteorm::statement::SqlTemplate;
//! use spiteorm::{
//!     create_command_processor, CommandFactory, CommandProcessorContext, ParameterContext,
//!     ProcessorConfig, QueryRequest, SqlLoadTask, TypeMapping,
//! };
//!
//! let driver = SqliteDriver::open_in_memory().unwrap();
//! driver.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);").unwrap();
//!
//! let config = ProcessorConfig::default();
//! let factory = CommandFactory::new(Arc::new(driver));
//! let mut processor = create_command_processor(factory, &config);
//!
//! let request = Arc::new(QueryRequest::new(
//!     SqlTemplate::text("SELECT id FROM t ORDER BY id"),
//!     Vec::new(),
//!     vec![TypeMapping::Integer],
//! ));
//! let task = SqlLoadTask::new(request, ParameterContext::new());
//! let output = task.output();
//! processor.register_task(task.into());
//!
//! let mut context = CommandProcessorContext::with_config(ParameterContext::new(), &config);
//! processor.execute_tasks(&mut context).unwrap();
//! assert_eq!(output.lock().len(), 2);
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: the crate-wide error type
//! - [`value`]: values, tuples and type mappings
//! - [`parameter`]: parameter bindings and the parameter context
//! - [`statement`]: compiled statement templates
//! - [`request`]: compiled query and persist requests
//! - [`driver`]: the storage driver seam and the SQLite driver
//! - [`command`]: command parts, commands and the command factory
//! - [`task`]: load and persist tasks
//! - [`processor`]: simple and batching command processors
//! - [`reader`]: the data reader returned to callers

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for command building and execution.
pub mod error;

/// Column values, tuples and type mappings.
pub mod value;

/// Parameter bindings of compiled requests.
pub mod parameter;

/// Compiled statement templates and their post-compiler configuration.
pub mod statement;

/// Compiled query and persist requests.
pub mod request;

/// Blocking and async execution modes.
pub mod mode;

/// Provider capabilities and processor configuration.
pub mod config;

/// Storage driver traits and the SQLite implementation.
///
/// The execution core only sees the traits. [`driver::SqliteDriver`] is the
/// driver the crate ships with.
pub mod driver;

/// Command parts, commands and the factory that builds them.
pub mod command;

/// Load and persist tasks.
pub mod task;

/// Command processors.
///
/// [`processor::create_command_processor`] picks the batching processor when
/// the provider supports DML batches and the configuration enables batching.
pub mod processor;

/// Cursor over query rows.
pub mod reader;

// =============================================================================
// Re-exports
// =============================================================================

pub use command::{Command, CommandFactory, CommandPart, TypeIdRegistry};
pub use config::{ProcessorConfig, ProviderInfo};
pub use error::{Error, Result};
pub use mode::ExecutionMode;
pub use parameter::{
    BindingId, BindingType, BindingValue, ParameterContext, PersistParameterBinding, QueryParameterBinding,
    TransmissionType,
};
pub use processor::{
    create_command_processor, BatchingCommandProcessor, CommandProcessor, CommandProcessorContext,
    SimpleCommandProcessor,
};
pub use reader::DataReader;
pub use request::{PersistRequest, QueryRequest, RowAccessor};
pub use task::{LoadOutput, SqlLoadTask, SqlPersistTask, SqlTask, SqlTaskProcessor, TaskOutcome};
pub use value::{Tuple, TypeMapping, Value};
