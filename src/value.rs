//! # Values, Tuples and Type Mappings
//!
//! The execution core moves rows between the session and the driver as
//! [`Tuple`]s: positional lists of [`Value`]s. A [`TypeMapping`] describes how
//! one column's value is bound to a native parameter and how the driver's raw
//! value is read back.
//!
//! ## Design Philosophy: Positional Rows
//!
//! Requests know their row shape up front (a list of type mappings), so
//! tuples don't carry column names. Field `i` of a tuple is column `i` of the
//! result set, and `get_value_or_default` yields [`Value::Null`] for fields
//! that are missing entirely.

use std::fmt;

use crate::error::{Error, Result};

// =============================================================================
// Value
// =============================================================================

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// Boolean. Drivers without a native boolean store it as 0/1.
    Boolean(bool),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the literal text of this value, as inlined into SQL for
    /// limit/offset placeholders.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Real(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Blob(v) => format!("<{} bytes>", v.len()),
            Value::Boolean(v) => (if *v { "1" } else { "0" }).to_string(),
        }
    }

    /// Short name of the variant, used in type-mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(v) => write!(f, "'{}'", v),
            other => write!(f, "{}", other.to_literal()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Tuple
// =============================================================================

/// A positional row of values.
///
/// # Example
///
/// ```rust
/// use spiteorm::{Tuple, Value};
///
/// let row = Tuple::from_values(vec![Value::Integer(1), "Alice".into()]);
/// assert_eq!(row.count(), 2);
/// assert_eq!(row.get_value_or_default(1), Value::Text("Alice".into()));
/// assert_eq!(row.get_value_or_default(5), Value::Null);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    /// Creates a tuple of `count` nulls.
    pub fn with_count(count: usize) -> Self {
        Self(vec![Value::Null; count])
    }

    /// Wraps existing values.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Number of fields.
    pub fn count(&self) -> usize {
        self.0.len()
    }

    /// Value of field `index`, or [`Value::Null`] when the field is absent.
    pub fn get_value_or_default(&self, index: usize) -> Value {
        self.0.get(index).cloned().unwrap_or(Value::Null)
    }

    /// Borrows field `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Overwrites field `index`.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        let count = self.0.len();
        let slot = self.0.get_mut(index).ok_or_else(|| {
            Error::InvalidOperation(format!("field {index} is out of range for a tuple of {count}"))
        })?;
        *slot = value;
        Ok(())
    }

    /// Copies `length` fields starting at `source_index` into `target`
    /// starting at `target_index`.
    pub fn copy_to(
        &self,
        target: &mut Tuple,
        source_index: usize,
        target_index: usize,
        length: usize,
    ) -> Result<()> {
        if source_index + length > self.count() || target_index + length > target.count() {
            return Err(Error::InvalidOperation(format!(
                "cannot copy {length} fields from {source_index} (of {}) to {target_index} (of {})",
                self.count(),
                target.count()
            )));
        }
        target.0[target_index..target_index + length]
            .clone_from_slice(&self.0[source_index..source_index + length]);
        Ok(())
    }

    /// Borrows all values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the tuple, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

// =============================================================================
// Type Mapping
// =============================================================================

/// How one column or parameter maps to the storage's native type.
///
/// # Binding vs Reading
///
/// - [`bind_value`](Self::bind_value) coerces a session value into what the
///   native parameter accepts (an integer mapping accepts booleans as 0/1).
/// - [`read_value`](Self::read_value) turns a raw driver value back into the
///   session's representation (a boolean column stored as 0/1 comes back as
///   [`Value::Boolean`]).
///
/// Nulls pass through both directions untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeMapping {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

impl TypeMapping {
    fn name(&self) -> &'static str {
        match self {
            TypeMapping::Integer => "integer",
            TypeMapping::Real => "real",
            TypeMapping::Text => "text",
            TypeMapping::Blob => "blob",
            TypeMapping::Boolean => "boolean",
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch {
            expected: self.name(),
            actual: value.kind().to_string(),
        }
    }

    /// Coerces `value` into the form bound to a native parameter.
    pub fn bind_value(&self, value: Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (TypeMapping::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (TypeMapping::Integer, Value::Boolean(v)) => Ok(Value::Integer(v as i64)),
            (TypeMapping::Real, Value::Real(v)) => Ok(Value::Real(v)),
            (TypeMapping::Real, Value::Integer(v)) => Ok(Value::Real(v as f64)),
            (TypeMapping::Text, Value::Text(v)) => Ok(Value::Text(v)),
            (TypeMapping::Blob, Value::Blob(v)) => Ok(Value::Blob(v)),
            (TypeMapping::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(v)),
            (TypeMapping::Boolean, Value::Integer(v)) => Ok(Value::Boolean(v != 0)),
            (_, other) => Err(self.mismatch(&other)),
        }
    }

    /// Converts a raw driver value into the session's representation.
    pub fn read_value(&self, raw: Value) -> Result<Value> {
        match (self, raw) {
            (_, Value::Null) => Ok(Value::Null),
            (TypeMapping::Boolean, Value::Integer(v)) => Ok(Value::Boolean(v != 0)),
            (TypeMapping::Real, Value::Integer(v)) => Ok(Value::Real(v as f64)),
            (TypeMapping::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (TypeMapping::Real, Value::Real(v)) => Ok(Value::Real(v)),
            (TypeMapping::Text, Value::Text(v)) => Ok(Value::Text(v)),
            (TypeMapping::Blob, Value::Blob(v)) => Ok(Value::Blob(v)),
            (TypeMapping::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(v)),
            (_, other) => Err(self.mismatch(&other)),
        }
    }
}
