//! Per-call scratch space of a command processor.

use std::collections::VecDeque;

use crate::command::Command;
use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::parameter::ParameterContext;
use crate::task::{SqlLoadTask, SqlTask};

/// State of one top-level `execute_tasks*` call.
///
/// Created by the session, passed by `&mut` through the processor, and
/// dropped when the call returns. Dropping it disposes any command that is
/// still active.
#[derive(Debug, Default)]
pub struct CommandProcessorContext {
    parameter_context: ParameterContext,
    pub(crate) allow_partial_execution: bool,
    /// Tasks taken from the processor's queue for this call.
    pub(crate) processing_tasks: VecDeque<SqlTask>,
    /// The command being assembled or executed.
    pub(crate) active_command: Option<Command>,
    /// Load tasks whose result sets the active command will produce, in the
    /// order their parts were added.
    pub(crate) active_tasks: Vec<SqlLoadTask>,
    pub(crate) reenter_depth: usize,
    next_prefix: usize,
}

impl CommandProcessorContext {
    pub fn new(parameter_context: ParameterContext, allow_partial_execution: bool) -> Self {
        Self {
            parameter_context,
            allow_partial_execution,
            ..Self::default()
        }
    }

    /// A context whose partial-execution flag comes from `config`.
    pub fn with_config(parameter_context: ParameterContext, config: &ProcessorConfig) -> Self {
        Self::new(parameter_context, config.allow_partial_execution)
    }

    /// Values for the final query of `execute_tasks_with_reader`.
    pub fn parameter_context(&self) -> &ParameterContext {
        &self.parameter_context
    }

    pub fn allow_partial_execution(&self) -> bool {
        self.allow_partial_execution
    }

    /// Tasks taken for execution but not yet consumed.
    pub fn processing_task_count(&self) -> usize {
        self.processing_tasks.len()
    }

    pub fn active_command(&self) -> Option<&Command> {
        self.active_command.as_ref()
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.len()
    }

    /// Depth of nested command allocation.
    pub fn reenter_depth(&self) -> usize {
        self.reenter_depth
    }

    /// Returns a parameter-name prefix not used before in this call.
    pub fn next_parameter_prefix(&mut self) -> String {
        let prefix = format!("p{}_", self.next_prefix);
        self.next_prefix += 1;
        prefix
    }

    pub(crate) fn active_command_mut(&mut self) -> Result<&mut Command> {
        self.active_command
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("no command is allocated".to_string()))
    }

    /// Disposes the active command, if any.
    pub fn dispose(&mut self) {
        if let Some(command) = self.active_command.as_mut() {
            command.dispose();
        }
    }
}
