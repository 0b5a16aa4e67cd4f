//! One task per command.
//!
//! Used when the provider can't batch DML or batching is switched off. Every
//! task gets a freshly allocated command that is disposed and released as
//! soon as the task is done, whether it succeeded or not.

use std::collections::VecDeque;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    allocate_command, dispose_and_release, ensure_fits_one_command, execute_persist_parts, put_tasks_for_execution,
    read_task_rows, return_unprocessed_tasks, CommandProcessor, CommandProcessorContext,
};
use crate::command::CommandFactory;
use crate::error::Result;
use crate::mode::ExecutionMode;
use crate::reader::DataReader;
use crate::request::QueryRequest;
use crate::task::{SqlLoadTask, SqlPersistTask, SqlTask, SqlTaskProcessor, TaskOutcome};

/// Executes each task in its own command.
#[derive(Debug)]
pub struct SimpleCommandProcessor {
    factory: CommandFactory,
    tasks: VecDeque<SqlTask>,
}

impl SimpleCommandProcessor {
    pub fn new(factory: CommandFactory) -> Self {
        Self {
            factory,
            tasks: VecDeque::new(),
        }
    }

    async fn execute_processing_tasks(
        &mut self,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<()> {
        while !context.processing_tasks.is_empty() {
            mode.ensure_not_cancelled()?;
            let Some(task) = context.processing_tasks.pop_front() else {
                break;
            };
            allocate_command(&self.factory, context)?;
            let processed = task.process_with(self, context, mode).await;
            let released = dispose_and_release(&self.factory, context);
            processed?;
            released?;
        }
        Ok(())
    }
}

#[async_trait]
impl SqlTaskProcessor for SimpleCommandProcessor {
    async fn process_load(
        &mut self,
        task: &SqlLoadTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome> {
        let part = self.factory.create_load_part(task, &context.next_parameter_prefix())?;
        ensure_fits_one_command(self.factory.provider_info(), slice::from_ref(&part))?;
        let command = context.active_command_mut()?;
        command.add_part(part)?;
        command.execute_reader_in(mode).await?;
        read_task_rows(command, task, mode).await?;
        Ok(TaskOutcome::Consumed)
    }

    async fn process_persist(
        &mut self,
        task: &SqlPersistTask,
        context: &mut CommandProcessorContext,
        mode: ExecutionMode<'_>,
    ) -> Result<TaskOutcome> {
        let parts = self.factory.create_persist_parts(task, &context.next_parameter_prefix())?;
        execute_persist_parts(&self.factory, task, parts, mode).await?;
        Ok(TaskOutcome::Consumed)
    }
}

#[async_trait]
impl CommandProcessor for SimpleCommandProcessor {
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
        put_tasks_for_execution(&mut self.tasks, context, 1);
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
        self.run_tasks(context, mode).await?;

        mode.ensure_not_cancelled()?;
        let prefix = context.next_parameter_prefix();
        let part = self
            .factory
            .create_query_part(&request, &prefix, context.parameter_context())?;
        ensure_fits_one_command(self.factory.provider_info(), slice::from_ref(&part))?;
        let mut command = self.factory.create_command()?;
        command.add_part(part)?;
        command.execute_reader_in(mode).await?;
        Ok(DataReader::from_command(command, request.accessor()))
    }
}
