//! # Data Reader
//!
//! A forward-only cursor over query rows. Two sources look the same to the
//! caller:
//!
//! - a live [`Command`] returned by `execute_tasks_with_reader`, positioned
//!   on the final query's result set
//! - an in-memory list of tuples ([`DataReader::from_tuples`])
//!
//! The reader owns its command. Disposing the reader (or dropping it)
//! disposes the command, its driver reader and its resources.

use std::vec;

use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::error::Result;
use crate::request::RowAccessor;
use crate::value::Tuple;

enum Source {
    Command { command: Command, accessor: RowAccessor },
    InMemory(vec::IntoIter<Tuple>),
    Closed,
}

/// Cursor over the rows of one query.
///
/// # Example
///
/// ```rust
/// use spiteorm::{DataReader, Tuple, Value};
///
/// let mut reader = DataReader::from_tuples(vec![
///     Tuple::from_values(vec![Value::Integer(1)]),
///     Tuple::from_values(vec![Value::Integer(2)]),
/// ]);
///
/// let mut seen = Vec::new();
/// while reader.move_next().unwrap() {
///     seen.push(reader.current().unwrap().get_value_or_default(0));
/// }
/// assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2)]);
/// ```
pub struct DataReader {
    source: Source,
    current: Option<Tuple>,
}

impl DataReader {
    /// Wraps a command whose reader is open on the rows to return.
    pub(crate) fn from_command(command: Command, accessor: RowAccessor) -> Self {
        Self {
            source: Source::Command { command, accessor },
            current: None,
        }
    }

    /// A reader over rows already in memory.
    pub fn from_tuples(tuples: Vec<Tuple>) -> Self {
        Self {
            source: Source::InMemory(tuples.into_iter()),
            current: None,
        }
    }

    /// Advances to the next row. Returns `false` once the rows are exhausted
    /// or the reader is disposed.
    pub fn move_next(&mut self) -> Result<bool> {
        self.current = match &mut self.source {
            Source::Command { command, accessor } => {
                if command.next_row()? {
                    Some(command.read_tuple_with(accessor)?)
                } else {
                    None
                }
            }
            Source::InMemory(rows) => rows.next(),
            Source::Closed => None,
        };
        Ok(self.current.is_some())
    }

    /// Async twin of [`move_next`](Self::move_next).
    pub async fn move_next_async(&mut self, token: &CancellationToken) -> Result<bool> {
        self.current = match &mut self.source {
            Source::Command { command, accessor } => {
                if command.next_row_async(token).await? {
                    Some(command.read_tuple_with(accessor)?)
                } else {
                    None
                }
            }
            Source::InMemory(rows) => rows.next(),
            Source::Closed => None,
        };
        Ok(self.current.is_some())
    }

    /// The row the reader is positioned on.
    pub fn current(&self) -> Option<&Tuple> {
        self.current.as_ref()
    }

    /// Reads every remaining row.
    pub fn collect_rows(&mut self) -> Result<Vec<Tuple>> {
        let mut rows = Vec::new();
        while self.move_next()? {
            if let Some(row) = self.current.take() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Releases the underlying command. Later calls do nothing.
    pub fn dispose(&mut self) {
        if let Source::Command { command, .. } = &mut self.source {
            command.dispose();
        }
        self.source = Source::Closed;
        self.current = None;
    }

    pub async fn dispose_async(&mut self) {
        if let Source::Command { command, .. } = &mut self.source {
            command.dispose_async().await;
        }
        self.source = Source::Closed;
        self.current = None;
    }
}

impl std::fmt::Debug for DataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            Source::Command { .. } => "command",
            Source::InMemory(_) => "in-memory",
            Source::Closed => "closed",
        };
        f.debug_struct("DataReader")
            .field("source", &source)
            .field("current", &self.current)
            .finish()
    }
}
