//! # Command Processors
//!
//! A processor takes registered tasks and turns them into as few commands as
//! the provider allows.
//!
//! ```text
//!  register_task ──► [ task queue ] ──put_tasks_for_execution──► context.processing_tasks
//!                                                                        │
//!                          ┌─────────────────────────────────────────────┘
//!                          ▼
//!               allocate_command ──► process_with ──► execute ──► drain rows ──► release_command
//! ```
//!
//! Two implementations share the primitives in this module:
//!
//! - [`SimpleCommandProcessor`]: one task per command
//! - [`BatchingCommandProcessor`]: many tasks per command, bounded by the
//!   batch size and the provider's parameter ceiling
//!
//! Use [`create_command_processor`] to pick one from configuration.
//!
//! ## Sync and Async
//!
//! Each processor implements the mode-generic `run_*` methods once. The
//! blocking entry points drive them with [`ExecutionMode::Blocking`], the
//! async ones pass the caller's cancellation token.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{Command, CommandFactory, CommandPart};
use crate::config::{ProcessorConfig, ProviderInfo};
use crate::error::{Error, Result};
use crate::mode::{run_blocking, ExecutionMode};
use crate::reader::DataReader;
use crate::request::QueryRequest;
use crate::task::{SqlLoadTask, SqlPersistTask, SqlTask};

mod batching;
mod context;
mod simple;

pub use batching::BatchingCommandProcessor;
pub use context::CommandProcessorContext;
pub use simple::SimpleCommandProcessor;

// =============================================================================
// Processor Trait
// =============================================================================

/// Executes registered tasks against the storage.
#[async_trait]
pub trait CommandProcessor: Send {
    /// Queues a task for the next `execute_tasks*` call.
    fn register_task(&mut self, task: SqlTask);

    /// Drops every queued task.
    fn clear_tasks(&mut self);

    /// Number of queued, not yet processed tasks.
    fn pending_task_count(&self) -> usize;

    fn factory(&self) -> &CommandFactory;

    /// Mode-generic form of [`execute_tasks`](Self::execute_tasks).
    async fn run_tasks(&mut self, context: &mut CommandProcessorContext, mode: ExecutionMode<'_>) -> Result<()>;

    /// Mode-generic form of
    /// [`execute_tasks_with_reader`](Self::execute_tasks_with_reader).
    async fn run_tasks_with_reader(
        &mut self,
        request: Arc<QueryRequest>,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<DataReader>;

    /// Executes queued tasks. With partial execution allowed, only whole
    /// batches run and the remainder stays queued.
    fn execute_tasks(&mut self, context: &mut CommandProcessorContext) -> Result<()> {
        run_blocking(self.run_tasks(context, ExecutionMode::Blocking))
    }

    async fn execute_tasks_async(
        &mut self,
        context: &mut CommandProcessorContext,
        token: &CancellationToken,
    ) -> Result<()> {
        self.run_tasks(context, ExecutionMode::Async(token)).await
    }

    /// Executes every queued task, then `request`, returning a live reader
    /// over its rows.
    fn execute_tasks_with_reader(
        &mut self,
        request: Arc<QueryRequest>,
        context: &mut CommandProcessorContext,
    ) -> Result<DataReader> {
        run_blocking(self.run_tasks_with_reader(request, context, ExecutionMode::Blocking))
    }

    async fn execute_tasks_with_reader_async(
        &mut self,
        request: Arc<QueryRequest>,
        context: &mut CommandProcessorContext,
        token: &CancellationToken,
    ) -> Result<DataReader> {
        self.run_tasks_with_reader(request, context, ExecutionMode::Async(token))
            .await
    }
}

/// Creates the processor `config` asks for on this provider.
pub fn create_command_processor(factory: CommandFactory, config: &ProcessorConfig) -> Box<dyn CommandProcessor> {
    if config.uses_batching(factory.provider_info()) {
        debug!(batch_size = config.batch_size, "using batching command processor");
        Box::new(BatchingCommandProcessor::new(factory, config.batch_size))
    } else {
        debug!("using simple command processor");
        Box::new(SimpleCommandProcessor::new(factory))
    }
}

// =============================================================================
// Shared Primitives
// =============================================================================

/// How a group of parts relates to the active command's parameter budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExecutionBehavior {
    /// The parts fit into the active command.
    AsOneCommand,
    /// The parts fit only into an empty command.
    AsTwoCommands,
    /// Every part fits, but not all of them together.
    AsSeveralCommands,
    /// Some part exceeds the limit on its own.
    TooLargeForAnyCommand,
}

/// Classifies `parts` against `provider`'s parameter ceiling, given
/// `current_parameter_count` parameters already in the active command.
pub fn command_execution_behavior(
    provider: &ProviderInfo,
    parts: &[CommandPart],
    current_parameter_count: usize,
) -> CommandExecutionBehavior {
    let Some(limit) = provider.max_query_parameter_count else {
        return CommandExecutionBehavior::AsOneCommand;
    };
    if parts.iter().any(|part| part.parameter_count() > limit) {
        return CommandExecutionBehavior::TooLargeForAnyCommand;
    }
    let required = total_parameters(parts);
    if required + current_parameter_count <= limit {
        CommandExecutionBehavior::AsOneCommand
    } else if required <= limit {
        CommandExecutionBehavior::AsTwoCommands
    } else {
        CommandExecutionBehavior::AsSeveralCommands
    }
}

fn total_parameters(parts: &[CommandPart]) -> usize {
    parts.iter().map(CommandPart::parameter_count).sum()
}

pub(crate) fn parameters_limit_exceeded(provider: &ProviderInfo, parts: &[CommandPart]) -> Error {
    Error::ParametersLimitExceeded {
        required: total_parameters(parts),
        limit: provider.max_query_parameter_count.unwrap_or(usize::MAX),
    }
}

/// Fails unless `parts` fit together into one empty command.
pub(crate) fn ensure_fits_one_command(provider: &ProviderInfo, parts: &[CommandPart]) -> Result<()> {
    match command_execution_behavior(provider, parts, 0) {
        CommandExecutionBehavior::AsOneCommand => Ok(()),
        _ => Err(parameters_limit_exceeded(provider, parts)),
    }
}

/// Makes a command active, or enters one more level if one already is.
pub(crate) fn allocate_command(factory: &CommandFactory, context: &mut CommandProcessorContext) -> Result<()> {
    if context.active_command.is_some() {
        context.reenter_depth += 1;
    } else {
        context.active_command = Some(factory.create_command()?);
        context.active_tasks.clear();
    }
    Ok(())
}

/// Leaves one allocation level. The outermost level clears the active
/// command; inner levels replace it with a fresh one.
pub(crate) fn release_command(factory: &CommandFactory, context: &mut CommandProcessorContext) -> Result<()> {
    context.active_tasks.clear();
    if context.reenter_depth > 0 {
        context.reenter_depth -= 1;
        context.active_command = Some(factory.create_command()?);
    } else {
        context.active_command = None;
    }
    Ok(())
}

/// Disposes the active command, then releases it.
pub(crate) fn dispose_and_release(factory: &CommandFactory, context: &mut CommandProcessorContext) -> Result<()> {
    context.dispose();
    release_command(factory, context)
}

/// Moves tasks from the processor's queue into the context. With partial
/// execution allowed, only whole multiples of `batch_size` are taken.
pub(crate) fn put_tasks_for_execution(
    tasks: &mut VecDeque<SqlTask>,
    context: &mut CommandProcessorContext,
    batch_size: usize,
) {
    let count = if context.allow_partial_execution {
        (tasks.len() / batch_size.max(1)) * batch_size.max(1)
    } else {
        tasks.len()
    };
    context.processing_tasks.extend(tasks.drain(..count));
}

/// Hands tasks that were taken but not executed back to the head of the
/// processor's queue, keeping their order.
pub(crate) fn return_unprocessed_tasks(tasks: &mut VecDeque<SqlTask>, context: &mut CommandProcessorContext) {
    while let Some(task) = context.processing_tasks.pop_back() {
        tasks.push_front(task);
    }
}

/// Streams the rows of the current result set into `task`'s output.
pub(crate) async fn read_task_rows(command: &mut Command, task: &SqlLoadTask, mode: ExecutionMode<'_>) -> Result<()> {
    let accessor = task.request().accessor();
    while command.next_row_in(mode).await? {
        task.push_row(command.read_tuple_with(&accessor)?);
    }
    Ok(())
}

/// Executes the active command. Result sets are read into the active tasks
/// in order; the reader is left open on the set that follows them.
pub(crate) async fn execute_active_command(
    context: &mut CommandProcessorContext,
    wants_reader: bool,
    mode: ExecutionMode<'_>,
) -> Result<()> {
    let command = context
        .active_command
        .as_mut()
        .ok_or_else(|| Error::InvalidOperation("no command is allocated".to_string()))?;
    if command.count() == 0 {
        return Ok(());
    }
    debug!(
        parts = command.count(),
        parameters = command.parameter_count(),
        active_tasks = context.active_tasks.len(),
        "executing batch"
    );

    if context.active_tasks.is_empty() && !wants_reader {
        command.execute_non_query_in(mode).await?;
        return Ok(());
    }

    command.execute_reader_in(mode).await?;
    for task in &context.active_tasks {
        read_task_rows(command, task, mode).await?;
        command.next_result_in(mode).await?;
    }
    Ok(())
}

/// Executes every part of a persist task in its own command.
///
/// # Errors
///
/// `Error::ParametersLimitExceeded` before any I/O if the task's parts don't
/// fit into one command. `Error::VersionConflict` if the task validates row
/// counts and a part affected no rows.
pub(crate) async fn execute_persist_parts(
    factory: &CommandFactory,
    task: &SqlPersistTask,
    parts: Vec<CommandPart>,
    mode: ExecutionMode<'_>,
) -> Result<()> {
    ensure_fits_one_command(factory.provider_info(), &parts)?;
    for part in parts {
        let mut command = factory.create_command()?;
        command.add_part(part)?;
        let affected = command.execute_non_query_in(mode).await;
        command.dispose_async().await;
        let affected = affected?;

        if task.validate_row_count() && affected == 0 {
            warn!(entity_key = task.entity_key(), "persist affected no rows");
            return Err(Error::VersionConflict {
                entity_key: task.entity_key().to_string(),
            });
        }
    }
    Ok(())
}
