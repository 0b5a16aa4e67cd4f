//! Command parts and the resources they carry.

use std::fmt;

use crate::driver::{LargeObject, Parameter};

/// A set of resources disposed together, exactly once.
#[derive(Default)]
pub struct DisposableSet {
    items: Vec<Box<dyn LargeObject>>,
    disposed: bool,
}

impl DisposableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: Box<dyn LargeObject>) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Moves every item of `other` into this set.
    pub fn extend(&mut self, other: DisposableSet) {
        self.items.extend(other.into_items());
    }

    fn into_items(mut self) -> Vec<Box<dyn LargeObject>> {
        // Ownership moves to the receiving set; nothing is disposed here.
        self.disposed = true;
        std::mem::take(&mut self.items)
    }

    /// Disposes all items in insertion order. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for item in &mut self.items {
            item.dispose();
        }
        self.items.clear();
    }
}

impl Drop for DisposableSet {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for DisposableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableSet")
            .field("len", &self.items.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// One statement of a command, with its parameters and resources.
///
/// Built once by the [`CommandFactory`](super::CommandFactory), then owned by
/// the [`Command`](super::Command) it is added to. Parameters are bound by
/// name to the references inside `statement`.
#[derive(Debug, Default)]
pub struct CommandPart {
    pub(crate) statement: String,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) resources: DisposableSet,
}

impl CommandPart {
    /// Creates a part with no parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }

    /// Creates a part from finished statement text and its parameters.
    pub fn with_parameters(statement: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            statement: statement.into(),
            parameters,
            resources: DisposableSet::new(),
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn resources(&self) -> &DisposableSet {
        &self.resources
    }
}
