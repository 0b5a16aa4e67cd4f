//! # SQL Tasks
//!
//! A task is one logical unit of work handed to a command processor:
//!
//! - [`SqlLoadTask`]: run a query and collect its rows into a shared output
//! - [`SqlPersistTask`]: run a sequence of DML statements for one entity
//!
//! The set of task kinds is closed, so [`SqlTask`] is an enum and dispatch is
//! a `match` into the processor's [`SqlTaskProcessor`] methods.
//!
//! ## Deferral
//!
//! A batching processor may decide that a task does not fit into the command
//! it is currently assembling. It reports [`TaskOutcome::Deferred`], the task
//! stays at the head of the queue, and the batch is executed without it. The
//! task is retried first in the next batch.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::mode::ExecutionMode;
use crate::parameter::ParameterContext;
use crate::processor::CommandProcessorContext;
use crate::request::{PersistRequest, QueryRequest};
use crate::value::Tuple;

/// Rows produced by a load task. Shared with the caller that registered it.
pub type LoadOutput = Arc<Mutex<Vec<Tuple>>>;

// =============================================================================
// Load Task
// =============================================================================

/// A query whose rows are streamed into [`LoadOutput`].
#[derive(Debug, Clone)]
pub struct SqlLoadTask {
    request: Arc<QueryRequest>,
    parameter_context: ParameterContext,
    output: LoadOutput,
}

impl SqlLoadTask {
    /// Creates a task with a fresh, empty output.
    pub fn new(request: Arc<QueryRequest>, parameter_context: ParameterContext) -> Self {
        Self {
            request,
            parameter_context,
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends rows to an existing output instead of a fresh one.
    pub fn with_output(mut self, output: LoadOutput) -> Self {
        self.output = output;
        self
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn parameter_context(&self) -> &ParameterContext {
        &self.parameter_context
    }

    /// Handle to the output buffer.
    pub fn output(&self) -> LoadOutput {
        Arc::clone(&self.output)
    }

    /// Snapshot of the rows collected so far.
    pub fn rows(&self) -> Vec<Tuple> {
        self.output.lock().clone()
    }

    pub(crate) fn push_row(&self, row: Tuple) {
        self.output.lock().push(row);
    }
}

// =============================================================================
// Persist Task
// =============================================================================

/// DML for one entity.
#[derive(Debug, Clone)]
pub struct SqlPersistTask {
    entity_key: String,
    request_sequence: Vec<Arc<PersistRequest>>,
    tuples: Vec<Tuple>,
    original_tuple: Option<Tuple>,
    validate_row_count: bool,
}

impl SqlPersistTask {
    /// Creates a task writing `tuple` through every request of
    /// `request_sequence`, in order.
    pub fn new(
        entity_key: impl Into<String>,
        request_sequence: Vec<Arc<PersistRequest>>,
        tuple: Tuple,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            request_sequence,
            tuples: vec![tuple],
            original_tuple: None,
            validate_row_count: false,
        }
    }

    /// Replaces the rows with several, for multi-row statements.
    pub fn with_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.tuples = tuples;
        self
    }

    /// Values read by version-filter bindings.
    pub fn with_original(mut self, original_tuple: Tuple) -> Self {
        self.original_tuple = Some(original_tuple);
        self
    }

    /// Require every statement to affect at least one row.
    pub fn with_row_count_validation(mut self, validate: bool) -> Self {
        self.validate_row_count = validate;
        self
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn request_sequence(&self) -> &[Arc<PersistRequest>] {
        &self.request_sequence
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn original_tuple(&self) -> Option<&Tuple> {
        self.original_tuple.as_ref()
    }

    pub fn validate_row_count(&self) -> bool {
        self.validate_row_count
    }
}

// =============================================================================
// Task Dispatch
// =============================================================================

/// What a processor did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task is part of the active command, or already executed.
    Consumed,
    /// The task does not fit; leave it queued for the next batch.
    Deferred,
}

/// Per-kind handling of tasks, implemented by each command processor.
#[async_trait]
pub trait SqlTaskProcessor: Send {
    async fn process_load(
        &mut self,
        task: &SqlLoadTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome>;

    async fn process_persist(
        &mut self,
        task: &SqlPersistTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome>;
}

/// A unit of work for a command processor.
#[derive(Debug, Clone)]
pub enum SqlTask {
    Load(SqlLoadTask),
    Persist(SqlPersistTask),
}

impl SqlTask {
    /// Dispatches to the processor method for this task's kind.
    pub async fn process_with<P>(
        &self,
        processor: &mut P,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome>
    where
        P: SqlTaskProcessor + ?Sized,
    {
        match self {
            SqlTask::Load(task) => processor.process_load(task, context, mode).await,
            SqlTask::Persist(task) => processor.process_persist(task, context, mode).await,
        }
    }

    pub fn as_load(&self) -> Option<&SqlLoadTask> {
        match self {
            SqlTask::Load(task) => Some(task),
            SqlTask::Persist(_) => None,
        }
    }
}

impl From<SqlLoadTask> for SqlTask {
    fn from(task: SqlLoadTask) -> Self {
        SqlTask::Load(task)
    }
}

impl From<SqlPersistTask> for SqlTask {
    fn from(task: SqlPersistTask) -> Self {
        SqlTask::Persist(task)
    }
}
