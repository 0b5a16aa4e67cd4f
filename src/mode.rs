//! # Execution Mode
//!
//! Every blocking operation of the execution core has an async twin. Instead
//! of writing each algorithm twice, processors are written once as `async`
//! code that takes an [`ExecutionMode`]:
//!
//! - [`ExecutionMode::Blocking`]: driver calls use their synchronous form.
//!   The resulting future never suspends, so the blocking entry points drive
//!   it to completion with `futures::executor::block_on`.
//! - [`ExecutionMode::Async`]: driver calls use their async form, and the
//!   cancellation token is checked before each new I/O step.
//!
//! ```text
//! execute_tasks()        ─┐
//!                         ├─► run_tasks(context, mode) ─► Command::*_in(mode)
//! execute_tasks_async()  ─┘
//! ```
//!
//! Batching thresholds, ordering and cleanup therefore cannot drift between
//! the two paths.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How I/O is performed for one top-level call.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionMode<'a> {
    /// Synchronous driver calls.
    Blocking,
    /// Async driver calls, cancellable through the token.
    Async(&'a CancellationToken),
}

impl ExecutionMode<'_> {
    /// Returns `Error::Cancelled` if this is an async call whose token has
    /// been cancelled.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        match self {
            ExecutionMode::Async(token) if token.is_cancelled() => {
                tracing::warn!("command execution cancelled before next I/O step");
                Err(Error::Cancelled)
            }
            _ => Ok(()),
        }
    }
}

/// Drives a future produced in [`ExecutionMode::Blocking`] to completion on
/// the current thread.
pub(crate) fn run_blocking<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}
