//! # Batching Command Processor
//!
//! Packs up to `batch_size` tasks into one command, so a flush of N entities
//! costs roughly N / batch_size round-trips instead of N.
//!
//! ## Batch Assembly
//!
//! ```text
//!   processing_tasks: [L1][P2][L3][P4*][L5]          (* = validates row count)
//!
//!   batch 1: command = L1 + P2 + L3      ── P4* flushes it early
//!            P4* runs standalone, checked for affected rows
//!            command = L5                ── executed at the end of the batch
//! ```
//!
//! A task joins the active command only while the provider's parameter
//! ceiling allows. A task that would overflow the command is deferred: it
//! stays at the head of the queue and opens the next batch. A task that
//! would overflow even an empty command fails with
//! `Error::ParametersLimitExceeded`; parts of one task are never split
//! across commands.
//!
//! ## Result Correlation
//!
//! Load tasks are remembered as *active tasks* in the order their parts were
//! added. After execution the reader's result sets are drained into them in
//! that same order, one `next_result` per task. DML statements produce no
//! result sets, so they don't shift the correlation.

use std::collections::VecDeque;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    allocate_command, command_execution_behavior, dispose_and_release, ensure_fits_one_command, execute_active_command,
    execute_persist_parts, parameters_limit_exceeded, put_tasks_for_execution, release_command,
    return_unprocessed_tasks, CommandExecutionBehavior, CommandProcessor, CommandProcessorContext,
};
use crate::command::{Command, CommandFactory, CommandPart};
use crate::error::Result;
use crate::mode::ExecutionMode;
use crate::reader::DataReader;
use crate::request::QueryRequest;
use crate::task::{SqlLoadTask, SqlPersistTask, SqlTask, SqlTaskProcessor, TaskOutcome};

/// Executes tasks in batches of `batch_size`.
#[derive(Debug)]
pub struct BatchingCommandProcessor {
    factory: CommandFactory,
    tasks: VecDeque<SqlTask>,
    batch_size: usize,
}

impl BatchingCommandProcessor {
    /// Creates a processor packing up to `batch_size` tasks per command.
    pub fn new(factory: CommandFactory, batch_size: usize) -> Self {
        Self {
            factory,
            tasks: VecDeque::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn behavior(&self, parts: &[CommandPart], context: &CommandProcessorContext) -> CommandExecutionBehavior {
        let current = context.active_command().map_or(0, Command::parameter_count);
        command_execution_behavior(self.factory.provider_info(), parts, current)
    }

    /// Adds all of `parts` to the active command, or none of them.
    ///
    /// Returns `false` when the parts only fit into an empty command.
    fn pend_command_parts(&self, parts: Vec<CommandPart>, context: &mut CommandProcessorContext) -> Result<bool> {
        match self.behavior(&parts, context) {
            CommandExecutionBehavior::AsOneCommand => {
                let command = context.active_command_mut()?;
                for part in parts {
                    command.add_part(part)?;
                }
                Ok(true)
            }
            CommandExecutionBehavior::AsTwoCommands => Ok(false),
            CommandExecutionBehavior::AsSeveralCommands | CommandExecutionBehavior::TooLargeForAnyCommand => {
                Err(parameters_limit_exceeded(self.factory.provider_info(), &parts))
            }
        }
    }

    async fn execute_processing_tasks(
        &mut self,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<()> {
        while context.processing_tasks.len() >= self.batch_size {
            self.execute_batch(self.batch_size, None, context, mode).await?;
        }
        if !context.allow_partial_execution {
            while !context.processing_tasks.is_empty() {
                let remaining = context.processing_tasks.len();
                self.execute_batch(remaining, None, context, mode).await?;
            }
        }
        Ok(())
    }

    /// Runs up to `number_of_tasks` tasks in one command.
    ///
    /// With `last_request`, the returned command has an open reader
    /// positioned on that request's rows. `None` means the request did not
    /// fit and must be retried in the next batch.
    async fn execute_batch(
        &mut self,
        number_of_tasks: usize,
        last_request: Option<&QueryRequest>,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<Option<Command>> {
        if number_of_tasks == 0 && last_request.is_none() {
            return Ok(None);
        }
        mode.ensure_not_cancelled()?;

        allocate_command(&self.factory, context)?;
        match self.assemble_and_execute(number_of_tasks, last_request, context, mode).await {
            Ok(true) => {
                let command = context.active_command.take();
                release_command(&self.factory, context)?;
                Ok(command)
            }
            Ok(false) => {
                dispose_and_release(&self.factory, context)?;
                Ok(None)
            }
            Err(error) => {
                if let Err(release_error) = dispose_and_release(&self.factory, context) {
                    warn!(%release_error, "failed to release command after batch failure");
                }
                Err(error)
            }
        }
    }

    /// Fills the active command and executes it. Returns whether the command
    /// holds a reader over `last_request`.
    async fn assemble_and_execute(
        &mut self,
        number_of_tasks: usize,
        last_request: Option<&QueryRequest>,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<bool> {
        let mut remaining = number_of_tasks;
        while remaining > 0 {
            let Some(task) = context.processing_tasks.pop_front() else {
                break;
            };
            match task.process_with(self, context, mode).await? {
                TaskOutcome::Consumed => remaining -= 1,
                TaskOutcome::Deferred => {
                    debug!(deferred_after = number_of_tasks - remaining, "task rolls over to next batch");
                    context.processing_tasks.push_front(task);
                    break;
                }
            }
        }

        let mut returns_reader = false;
        if let Some(request) = last_request {
            if context.processing_tasks.is_empty() {
                let prefix = context.next_parameter_prefix();
                let part = self
                    .factory
                    .create_query_part(request, &prefix, context.parameter_context())?;
                returns_reader = self.pend_command_parts(vec![part], context)?;
            }
        }

        execute_active_command(context, returns_reader, mode).await?;
        Ok(returns_reader)
    }

    /// Flushes the active command, then runs `task` in commands of its own.
    ///
    /// An oversized task fails before the flush.
    async fn execute_unbatched(
        &mut self,
        task: &SqlPersistTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<()> {
        let parts = self.factory.create_persist_parts(task, &context.next_parameter_prefix())?;
        ensure_fits_one_command(self.factory.provider_info(), &parts)?;

        let has_pending_parts = context.active_command().is_some_and(|command| command.count() > 0);
        if has_pending_parts {
            debug!(entity_key = task.entity_key(), "flushing batch before validated persist");
            allocate_command(&self.factory, context)?;
            let flushed = execute_active_command(context, false, mode).await;
            let released = dispose_and_release(&self.factory, context);
            flushed?;
            released?;
        }

        execute_persist_parts(&self.factory, task, parts, mode).await
    }
}

#[async_trait]
impl SqlTaskProcessor for BatchingCommandProcessor {
    async fn process_load(
        &mut self,
        task: &SqlLoadTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome> {
        let part = self.factory.create_load_part(task, &context.next_parameter_prefix())?;
        match self.behavior(slice::from_ref(&part), context) {
            CommandExecutionBehavior::AsOneCommand => {
                context.active_command_mut()?.add_part(part)?;
                context.active_tasks.push(task.clone());
                Ok(TaskOutcome::Consumed)
            }
            CommandExecutionBehavior::AsTwoCommands => Ok(TaskOutcome::Deferred),
            CommandExecutionBehavior::AsSeveralCommands | CommandExecutionBehavior::TooLargeForAnyCommand => Err(
                parameters_limit_exceeded(self.factory.provider_info(), slice::from_ref(&part)),
            ),
        }
    }

    async fn process_persist(
        &mut self,
        task: &SqlPersistTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome> {
        if task.validate_row_count() {
            self.execute_unbatched(task, context, mode).await?;
            return Ok(TaskOutcome::Consumed);
        }

        let parts = self.factory.create_persist_parts(task, &context.next_parameter_prefix())?;
        if self.pend_command_parts(parts, context)? {
            Ok(TaskOutcome::Consumed)
        } else {
            Ok(TaskOutcome::Deferred)
        }
    }
}

#[async_trait]
impl CommandProcessor for BatchingCommandProcessor {
    fn register_task(&mut self, task: SqlTask) {
        self.tasks.push_back(task);
    }

    fn clear_tasks(&mut self) {
        self.tasks.clear();
    }

    fn pending_task_count(&self) -> usize {
        self.tasks.len()
    }

    fn factory(&self) -> &CommandFactory {
        &self.factory
    }

    async fn run_tasks(&mut self, context: &mut CommandProcessorContext, mode: ExecutionMode<'_>) -> Result<()> {
        put_tasks_for_execution(&mut self.tasks, context, self.batch_size);
        let result = self.execute_processing_tasks(context, mode).await;
        return_unprocessed_tasks(&mut self.tasks, context);
        result
    }

    async fn run_tasks_with_reader(
        &mut self,
        request: Arc<QueryRequest>,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<DataReader> {
        context.allow_partial_execution = false;
        put_tasks_for_execution(&mut self.tasks, context, self.batch_size);

        let result = loop {
            let batch = context.processing_tasks.len().min(self.batch_size);
            match self.execute_batch(batch, Some(&request), context, mode).await {
                Ok(Some(command)) => break Ok(command),
                Ok(None) => continue,
                Err(error) => break Err(error),
            }
        };
        return_unprocessed_tasks(&mut self.tasks, context);
        Ok(DataReader::from_command(result?, request.accessor()))
    }
}
