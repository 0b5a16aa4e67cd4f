//! # Parameter Bindings
//!
//! A compiled request does not contain values. It contains *bindings*: slots
//! in the statement that the [`CommandFactory`](crate::command::CommandFactory)
//! fills in when it builds a command part. Each binding knows:
//!
//! - its [`BindingType`], which decides whether the value becomes a bound
//!   parameter, inlined literal text, or an alternative branch of the statement
//! - its [`TransmissionType`], which decides whether a bound value travels as
//!   a plain parameter or through a large-object handle
//! - its [`TypeMapping`], which coerces the value for the native parameter
//! - where its value comes from: an accessor over a [`ParameterContext`] for
//!   queries, or a tuple field for persists
//!
//! ## Binding Identity
//!
//! Templates refer to bindings by [`BindingId`]. Ids are allocated from a
//! process-wide counter so two bindings never collide even when requests are
//! built on different threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BoxError;
use crate::value::{Tuple, TypeMapping, Value};

// =============================================================================
// Binding Identity
// =============================================================================

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a binding inside compiled statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    /// Allocates a fresh, never reused id.
    pub fn next() -> Self {
        Self(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value, for diagnostics.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Binding Kinds
// =============================================================================

/// How the factory treats a binding's resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Bind the value to a fresh named parameter.
    Regular,
    /// A null value activates the alternative branch (`IS NULL`) instead of
    /// binding a parameter.
    SmartNull,
    /// `true` activates the alternative branch; nothing is ever bound.
    BooleanConstant,
    /// Inline the value as literal text.
    LimitOffset,
    /// Like [`LimitOffset`](Self::LimitOffset), but `0` is replaced by `1`
    /// and activates the alternative branch.
    NonZeroLimitOffset,
    /// A list of rows expanded into an IN-list of parameters.
    RowFilter,
    /// A type reference replaced by its runtime type id, then bound.
    TypeIdentifier,
    /// Persist-only: an optimistic-concurrency comparison against the
    /// original value. Null-like values activate the alternative branch.
    VersionFilter,
}

/// How a bound value travels to the storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransmissionType {
    #[default]
    Regular,
    CharacterLob,
    BinaryLob,
}

// =============================================================================
// Resolved Values and Parameter Context
// =============================================================================

/// A value resolved for a binding.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    /// A single value.
    Scalar(Value),
    /// Rows for a [`BindingType::RowFilter`]. `None` means "no filter list".
    Rows(Option<Vec<Tuple>>),
}

impl From<Value> for BindingValue {
    fn from(value: Value) -> Self {
        BindingValue::Scalar(value)
    }
}

impl From<Vec<Tuple>> for BindingValue {
    fn from(rows: Vec<Tuple>) -> Self {
        BindingValue::Rows(Some(rows))
    }
}

/// Values that query bindings are resolved against.
///
/// The session fills one context per query execution; compiled requests stay
/// reusable because they only hold accessors.
///
/// # Example
///
/// ```rust
/// use spiteorm::{ParameterContext, Value};
///
/// let context = ParameterContext::new()
///     .with("customer_id", Value::Integer(7))
///     .with("name", Value::Null);
/// assert!(context.get("customer_id").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParameterContext {
    values: HashMap<String, BindingValue>,
}

impl ParameterContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<BindingValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<BindingValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }
}

/// Resolves a query binding's value from a [`ParameterContext`].
pub type ValueAccessor =
    Arc<dyn Fn(&ParameterContext) -> std::result::Result<BindingValue, BoxError> + Send + Sync>;

// =============================================================================
// Query Bindings
// =============================================================================

/// A binding inside a compiled query.
#[derive(Clone)]
pub struct QueryParameterBinding {
    id: BindingId,
    binding_type: BindingType,
    transmission_type: TransmissionType,
    type_mapping: TypeMapping,
    row_type_mapping: Vec<TypeMapping>,
    accessor: ValueAccessor,
}

impl QueryParameterBinding {
    /// Creates a binding with a custom accessor.
    pub fn new(binding_type: BindingType, type_mapping: TypeMapping, accessor: ValueAccessor) -> Self {
        Self {
            id: BindingId::next(),
            binding_type,
            transmission_type: TransmissionType::Regular,
            type_mapping,
            row_type_mapping: Vec::new(),
            accessor,
        }
    }

    /// Creates a binding that reads `name` from the parameter context.
    ///
    /// A missing name is an accessor failure, reported by the factory.
    pub fn from_parameter(
        binding_type: BindingType,
        type_mapping: TypeMapping,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let accessor: ValueAccessor = Arc::new(move |context: &ParameterContext| {
            context.get(&name).cloned().ok_or_else(|| -> BoxError {
                format!("parameter '{name}' is not set in the parameter context").into()
            })
        });
        Self::new(binding_type, type_mapping, accessor)
    }

    /// Creates a [`BindingType::RowFilter`] binding over rows shaped by
    /// `row_type_mapping`.
    pub fn row_filter(row_type_mapping: Vec<TypeMapping>, name: impl Into<String>) -> Self {
        let mut binding = Self::from_parameter(
            BindingType::RowFilter,
            row_type_mapping.first().copied().unwrap_or(TypeMapping::Integer),
            name,
        );
        binding.row_type_mapping = row_type_mapping;
        binding
    }

    /// Sets the transmission type.
    pub fn with_transmission(mut self, transmission_type: TransmissionType) -> Self {
        self.transmission_type = transmission_type;
        self
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn binding_type(&self) -> BindingType {
        self.binding_type
    }

    pub fn transmission_type(&self) -> TransmissionType {
        self.transmission_type
    }

    pub fn type_mapping(&self) -> TypeMapping {
        self.type_mapping
    }

    pub fn row_type_mapping(&self) -> &[TypeMapping] {
        &self.row_type_mapping
    }

    /// Runs the accessor.
    pub fn resolve(&self, context: &ParameterContext) -> std::result::Result<BindingValue, BoxError> {
        (self.accessor)(context)
    }
}

impl fmt::Debug for QueryParameterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParameterBinding")
            .field("id", &self.id)
            .field("binding_type", &self.binding_type)
            .field("transmission_type", &self.transmission_type)
            .field("type_mapping", &self.type_mapping)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Persist Bindings
// =============================================================================

/// A binding inside a compiled DML statement.
///
/// Regular bindings read `tuples[row_index][field_index]` of the persist
/// task. [`BindingType::VersionFilter`] bindings read `field_index` of the
/// task's original tuple.
#[derive(Debug, Clone)]
pub struct PersistParameterBinding {
    id: BindingId,
    binding_type: BindingType,
    transmission_type: TransmissionType,
    type_mapping: TypeMapping,
    field_index: usize,
    row_index: usize,
}

impl PersistParameterBinding {
    /// A regular binding of field `field_index` of the first row.
    pub fn new(type_mapping: TypeMapping, field_index: usize) -> Self {
        Self {
            id: BindingId::next(),
            binding_type: BindingType::Regular,
            transmission_type: TransmissionType::Regular,
            type_mapping,
            field_index,
            row_index: 0,
        }
    }

    /// An optimistic-concurrency binding over the original tuple.
    pub fn version_filter(type_mapping: TypeMapping, field_index: usize) -> Self {
        Self {
            binding_type: BindingType::VersionFilter,
            ..Self::new(type_mapping, field_index)
        }
    }

    /// Reads from row `row_index` of a multi-row persist.
    pub fn with_row(mut self, row_index: usize) -> Self {
        self.row_index = row_index;
        self
    }

    pub fn with_transmission(mut self, transmission_type: TransmissionType) -> Self {
        self.transmission_type = transmission_type;
        self
    }

    /// Overrides the binding type. Only `Regular` and `VersionFilter` are
    /// accepted by the factory.
    pub fn with_binding_type(mut self, binding_type: BindingType) -> Self {
        self.binding_type = binding_type;
        self
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn binding_type(&self) -> BindingType {
        self.binding_type
    }

    pub fn transmission_type(&self) -> TransmissionType {
        self.transmission_type
    }

    pub fn type_mapping(&self) -> TypeMapping {
        self.type_mapping
    }

    pub fn field_index(&self) -> usize {
        self.field_index
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_ids_are_unique() {
        let a = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Integer, "a");
        let b = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Integer, "a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_missing_parameter_is_an_accessor_error() {
        let binding =
            QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Text, "name");

        let err = binding.resolve(&ParameterContext::new()).unwrap_err();
        assert!(err.to_string().contains("'name'"));

        let context = ParameterContext::new().with("name", Value::from("Bob"));
        assert_eq!(
            binding.resolve(&context).unwrap(),
            BindingValue::Scalar(Value::Text("Bob".into()))
        );
    }
}
