//! # Command Factory
//!
//! Turns compiled requests plus runtime values into [`CommandPart`]s. This is
//! where every binding decision is made:
//!
//! | Binding type | Value | Result |
//! |--------------|-------|--------|
//! | `Regular` | any | fresh parameter `{prefix}{index}` |
//! | `SmartNull` | null-like | alternative branch, no parameter |
//! | `BooleanConstant` | `true` | alternative branch, never a parameter |
//! | `LimitOffset` | any | literal text inlined |
//! | `NonZeroLimitOffset` | `0` | `1` inlined, alternative branch |
//! | `RowFilter` | `None` | alternative branch |
//! | `RowFilter` | rows | one parameter per cell `{base}_{row}_{field}` |
//! | `TypeIdentifier` | type name | registered type id, bound |
//! | `VersionFilter` | null-like | alternative branch (persist only) |
//!
//! Values that travel as large objects are streamed into a driver handle in
//! blocks of [`LOB_BLOCK_SIZE`]. The handle becomes a resource of the part and
//! lives until the command that executes the part is disposed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::{Command, CommandPart, DisposableSet};
use crate::config::ProviderInfo;
use crate::driver::{DriverResult, LargeObject, Parameter, StorageDriver};
use crate::error::{Error, Result};
use crate::parameter::{BindingId, BindingType, BindingValue, ParameterContext, TransmissionType};
use crate::request::QueryRequest;
use crate::statement::{PostCompilerConfiguration, SqlTemplate};
use crate::task::{SqlLoadTask, SqlPersistTask};
use crate::value::{Tuple, TypeMapping, Value};

/// Characters (or bytes) written into a large object per call.
pub const LOB_BLOCK_SIZE: usize = 65_535;

// =============================================================================
// Type Identifiers
// =============================================================================

/// Maps type names to the ids stored in type-discriminator columns.
#[derive(Debug, Clone, Default)]
pub struct TypeIdRegistry {
    ids: HashMap<String, i64>,
}

impl TypeIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, type_name: impl Into<String>, type_id: i64) -> Self {
        self.register(type_name, type_id);
        self
    }

    pub fn register(&mut self, type_name: impl Into<String>, type_id: i64) {
        self.ids.insert(type_name.into(), type_id);
    }

    pub fn get(&self, type_name: &str) -> Option<i64> {
        self.ids.get(type_name).copied()
    }

    /// Replaces a type name with its id. Nulls pass through.
    pub fn resolve(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(name) => self
                .get(name)
                .map(Value::Integer)
                .ok_or_else(|| Error::UnknownType(name.clone())),
            other => Err(Error::TypeMismatch {
                expected: "type name",
                actual: other.kind().to_string(),
            }),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds command parts and commands for one storage driver.
#[derive(Clone)]
pub struct CommandFactory {
    driver: Arc<dyn StorageDriver>,
    type_ids: TypeIdRegistry,
    schema_mapping: HashMap<String, String>,
}

impl CommandFactory {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            type_ids: TypeIdRegistry::default(),
            schema_mapping: HashMap::new(),
        }
    }

    /// Sets the registry used for `TypeIdentifier` bindings.
    pub fn with_type_ids(mut self, type_ids: TypeIdRegistry) -> Self {
        self.type_ids = type_ids;
        self
    }

    /// Sets schema name overrides applied to every statement.
    pub fn with_schema_mapping(mut self, schema_mapping: HashMap<String, String>) -> Self {
        self.schema_mapping = schema_mapping;
        self
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    pub fn provider_info(&self) -> &ProviderInfo {
        self.driver.provider_info()
    }

    /// Creates an empty command on the driver.
    pub fn create_command(&self) -> Result<Command> {
        let underlying = self.driver.create_command()?;
        Ok(Command::new(Arc::clone(&self.driver), underlying))
    }

    /// Whether the provider stores `value` as NULL.
    pub fn is_handled_like_null(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Text(text) => text.is_empty() && self.provider_info().empty_string_is_null,
            _ => false,
        }
    }

    /// Builds the part of a load task.
    pub fn create_load_part(&self, task: &SqlLoadTask, parameter_name_prefix: &str) -> Result<CommandPart> {
        self.create_query_part(task.request(), parameter_name_prefix, task.parameter_context())
    }

    /// Builds a part for `request` with values resolved against
    /// `parameter_context`.
    ///
    /// # Errors
    ///
    /// - `Error::ParameterResolution` if an accessor fails
    /// - `Error::UnexpectedBindingType` for persist-only bindings
    /// - `Error::TypeMismatch` / `Error::UnknownType` for values the binding
    ///   cannot carry
    pub fn create_query_part(
        &self,
        request: &QueryRequest,
        parameter_name_prefix: &str,
        parameter_context: &ParameterContext,
    ) -> Result<CommandPart> {
        let mut builder = PartBuilder::new(self, parameter_name_prefix);

        for binding in request.parameter_bindings() {
            let id = binding.id();
            let resolve = || {
                binding
                    .resolve(parameter_context)
                    .map_err(|source| Error::ParameterResolution { binding: id, source })
            };

            match binding.binding_type() {
                BindingType::Regular => {
                    let value = scalar(resolve()?)?;
                    builder.add_regular(id, binding.transmission_type(), binding.type_mapping(), value)?;
                }
                BindingType::SmartNull => {
                    let value = scalar(resolve()?)?;
                    if self.is_handled_like_null(&value) {
                        builder.use_alternative_branch(id);
                    } else {
                        builder.add_regular(id, binding.transmission_type(), binding.type_mapping(), value)?;
                    }
                }
                BindingType::BooleanConstant => match scalar(resolve()?)? {
                    Value::Boolean(true) => builder.use_alternative_branch(id),
                    Value::Boolean(false) | Value::Null => {}
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: "boolean",
                            actual: other.kind().to_string(),
                        })
                    }
                },
                BindingType::LimitOffset => {
                    builder.inline(id, scalar(resolve()?)?.to_literal());
                }
                BindingType::NonZeroLimitOffset => {
                    let literal = scalar(resolve()?)?.to_literal();
                    if literal == "0" {
                        builder.inline(id, "1".to_string());
                        builder.use_alternative_branch(id);
                    } else {
                        builder.inline(id, literal);
                    }
                }
                BindingType::RowFilter => match rows(resolve()?)? {
                    None => builder.use_alternative_branch(id),
                    Some(rows) => builder.add_row_filter(id, binding.row_type_mapping(), &rows)?,
                },
                BindingType::TypeIdentifier => {
                    let type_id = self.type_ids.resolve(&scalar(resolve()?)?)?;
                    builder.add_regular(id, binding.transmission_type(), binding.type_mapping(), type_id)?;
                }
                binding_type @ BindingType::VersionFilter => {
                    return Err(Error::UnexpectedBindingType {
                        binding_type,
                        usage: "query",
                    })
                }
            }
        }

        builder.finish(request.compiled_statement())
    }

    /// Builds one part per request of the task's sequence, in order.
    ///
    /// Parameter numbering continues across the whole sequence, so names are
    /// unique within the task.
    pub fn create_persist_parts(
        &self,
        task: &SqlPersistTask,
        parameter_name_prefix: &str,
    ) -> Result<Vec<CommandPart>> {
        let mut builder = PartBuilder::new(self, parameter_name_prefix);
        let mut parts = Vec::with_capacity(task.request_sequence().len());

        for request in task.request_sequence() {
            for binding in request.parameter_bindings() {
                let id = binding.id();
                match binding.binding_type() {
                    BindingType::Regular => {
                        let row = persist_row(task, binding.row_index())?;
                        let value = row.get_value_or_default(binding.field_index());
                        builder.add_regular(id, binding.transmission_type(), binding.type_mapping(), value)?;
                    }
                    BindingType::VersionFilter => {
                        let original = task.original_tuple().ok_or_else(|| {
                            Error::InvalidOperation(format!(
                                "version filter of entity '{}' requires an original tuple",
                                task.entity_key()
                            ))
                        })?;
                        let value = original.get_value_or_default(binding.field_index());
                        if self.is_handled_like_null(&value) {
                            builder.use_alternative_branch(id);
                        } else {
                            builder.add_regular(id, binding.transmission_type(), binding.type_mapping(), value)?;
                        }
                    }
                    binding_type => {
                        return Err(Error::UnexpectedBindingType {
                            binding_type,
                            usage: "persist",
                        })
                    }
                }
            }
            parts.push(builder.finish(request.compiled_statement())?);
        }

        Ok(parts)
    }
}

impl std::fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFactory")
            .field("provider_info", self.provider_info())
            .field("type_ids", &self.type_ids)
            .finish_non_exhaustive()
    }
}

fn scalar(value: BindingValue) -> Result<Value> {
    match value {
        BindingValue::Scalar(value) => Ok(value),
        BindingValue::Rows(_) => Err(Error::TypeMismatch {
            expected: "scalar",
            actual: "rows".to_string(),
        }),
    }
}

fn rows(value: BindingValue) -> Result<Option<Vec<Tuple>>> {
    match value {
        BindingValue::Rows(rows) => Ok(rows),
        BindingValue::Scalar(Value::Null) => Ok(None),
        BindingValue::Scalar(other) => Err(Error::TypeMismatch {
            expected: "rows",
            actual: other.kind().to_string(),
        }),
    }
}

fn persist_row(task: &SqlPersistTask, row_index: usize) -> Result<&Tuple> {
    task.tuples().get(row_index).ok_or_else(|| {
        Error::InvalidOperation(format!(
            "persist binding reads row {row_index}, but entity '{}' has {} rows",
            task.entity_key(),
            task.tuples().len()
        ))
    })
}

// =============================================================================
// Part Builder
// =============================================================================

/// Accumulates bindings for one part at a time. The parameter index survives
/// [`finish`](Self::finish), so consecutive parts never reuse a name.
struct PartBuilder<'a> {
    factory: &'a CommandFactory,
    prefix: &'a str,
    next_index: usize,
    configuration: PostCompilerConfiguration,
    parameters: Vec<Parameter>,
    resources: DisposableSet,
}

impl<'a> PartBuilder<'a> {
    fn new(factory: &'a CommandFactory, prefix: &'a str) -> Self {
        Self {
            factory,
            prefix,
            next_index: 0,
            configuration: Self::fresh_configuration(factory),
            parameters: Vec::new(),
            resources: DisposableSet::new(),
        }
    }

    fn fresh_configuration(factory: &CommandFactory) -> PostCompilerConfiguration {
        PostCompilerConfiguration {
            schema_mapping: factory.schema_mapping.clone(),
            ..PostCompilerConfiguration::default()
        }
    }

    fn next_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next_index);
        self.next_index += 1;
        name
    }

    fn use_alternative_branch(&mut self, binding: BindingId) {
        self.configuration.alternative_branches.insert(binding);
    }

    fn inline(&mut self, binding: BindingId, literal: String) {
        self.configuration.placeholder_values.insert(binding, literal);
    }

    fn add_regular(
        &mut self,
        binding: BindingId,
        transmission_type: TransmissionType,
        type_mapping: TypeMapping,
        value: Value,
    ) -> Result<()> {
        let name = self.next_name();
        let reference = self.factory.driver.build_parameter_reference(&name);
        self.bind(&name, transmission_type, type_mapping, value)?;
        self.configuration.placeholder_values.insert(binding, reference);
        Ok(())
    }

    fn add_row_filter(&mut self, binding: BindingId, row_mapping: &[TypeMapping], rows: &[Tuple]) -> Result<()> {
        let base = self.next_name();
        let mut grid = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let mut references = Vec::with_capacity(row_mapping.len());
            for (field_index, mapping) in row_mapping.iter().enumerate() {
                let name = format!("{base}_{row_index}_{field_index}");
                let value = mapping.bind_value(row.get_value_or_default(field_index))?;
                references.push(self.factory.driver.build_parameter_reference(&name));
                self.parameters.push(Parameter::new(name, value));
            }
            grid.push(references);
        }
        self.configuration.dynamic_filter_values.insert(binding, grid);
        Ok(())
    }

    fn bind(
        &mut self,
        name: &str,
        transmission_type: TransmissionType,
        type_mapping: TypeMapping,
        value: Value,
    ) -> Result<()> {
        match transmission_type {
            TransmissionType::Regular => {
                let value = type_mapping.bind_value(value)?;
                self.parameters.push(Parameter::new(name, value));
            }
            TransmissionType::CharacterLob => {
                let mut lob = self.factory.driver.create_character_lob()?;
                let written = write_character_lob(lob.as_mut(), &value);
                self.attach_lob(name, lob, written)?;
            }
            TransmissionType::BinaryLob => {
                let mut lob = self.factory.driver.create_binary_lob()?;
                let written = write_binary_lob(lob.as_mut(), &value);
                self.attach_lob(name, lob, written)?;
            }
        }
        Ok(())
    }

    fn attach_lob(
        &mut self,
        name: &str,
        mut lob: Box<dyn LargeObject>,
        written: DriverResult<()>,
    ) -> Result<()> {
        if let Err(error) = written {
            lob.dispose();
            let context = format!("writing large object for parameter {name}");
            return Err(self.factory.driver.build_exception(error, &context));
        }
        self.parameters.push(lob.bind_to(name));
        self.resources.add(lob);
        Ok(())
    }

    /// Renders the statement and hands out the accumulated part.
    fn finish(&mut self, statement: &SqlTemplate) -> Result<CommandPart> {
        let configuration =
            std::mem::replace(&mut self.configuration, Self::fresh_configuration(self.factory));
        let parameters = std::mem::take(&mut self.parameters);
        let resources = std::mem::take(&mut self.resources);
        let statement = statement.render(&configuration)?;
        trace!(
            prefix = self.prefix,
            parameters = parameters.len(),
            resources = resources.len(),
            "built command part"
        );
        Ok(CommandPart {
            statement,
            parameters,
            resources,
        })
    }
}

fn write_character_lob(
    lob: &mut dyn LargeObject,
    value: &Value,
) -> DriverResult<()> {
    let text = match value {
        Value::Null => return lob.erase(),
        Value::Text(text) => text,
        other => return Err(format!("cannot write {} into a character large object", other.kind()).into()),
    };
    if text.is_empty() {
        return lob.erase();
    }
    let mut start = 0;
    for (count, (offset, _)) in text.char_indices().enumerate() {
        if count > 0 && count % LOB_BLOCK_SIZE == 0 {
            lob.write_chars(&text[start..offset])?;
            start = offset;
        }
    }
    lob.write_chars(&text[start..])
}

fn write_binary_lob(
    lob: &mut dyn LargeObject,
    value: &Value,
) -> DriverResult<()> {
    let bytes = match value {
        Value::Null => return lob.erase(),
        Value::Blob(bytes) => bytes,
        other => return Err(format!("cannot write {} into a binary large object", other.kind()).into()),
    };
    if bytes.is_empty() {
        return lob.erase();
    }
    for block in bytes.chunks(LOB_BLOCK_SIZE) {
        lob.write_bytes(block)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use crate::parameter::{PersistParameterBinding, QueryParameterBinding};
    use crate::request::PersistRequest;

    fn factory() -> CommandFactory {
        let driver = SqliteDriver::open_in_memory().unwrap();
        CommandFactory::new(Arc::new(driver))
    }

    /// Records every block written, so chunking can be observed.
    #[derive(Default)]
    struct RecordingLob {
        blocks: Vec<usize>,
        erased: bool,
    }

    impl LargeObject for RecordingLob {
        fn write_chars(&mut self, chunk: &str) -> crate::driver::DriverResult<()> {
            self.blocks.push(chunk.chars().count());
            Ok(())
        }

        fn write_bytes(&mut self, chunk: &[u8]) -> crate::driver::DriverResult<()> {
            self.blocks.push(chunk.len());
            Ok(())
        }

        fn erase(&mut self) -> crate::driver::DriverResult<()> {
            self.erased = true;
            Ok(())
        }

        fn bind_to(&self, parameter_name: &str) -> Parameter {
            Parameter::new(parameter_name, Value::Null)
        }

        fn dispose(&mut self) {}
    }

    #[test]
    fn test_regular_bindings_are_numbered_from_prefix() {
        let factory = factory();
        let a = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Integer, "a");
        let b = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Text, "b");
        let template = SqlTemplate::builder()
            .text("SELECT * FROM t WHERE a = ")
            .placeholder(a.id())
            .text(" AND b = ")
            .placeholder(b.id())
            .build();
        let request = QueryRequest::new(template, vec![a, b], vec![TypeMapping::Integer]);
        let context = ParameterContext::new()
            .with("a", Value::Integer(1))
            .with("b", Value::from("x"));

        let part = factory.create_query_part(&request, "p3_", &context).unwrap();
        assert_eq!(part.statement(), "SELECT * FROM t WHERE a = @p3_0 AND b = @p3_1");
        assert_eq!(
            part.parameters(),
            &[
                Parameter::new("p3_0", Value::Integer(1)),
                Parameter::new("p3_1", Value::from("x")),
            ]
        );
    }

    #[test]
    fn test_smart_null_with_null_value_binds_nothing() {
        let factory = factory();
        let name = QueryParameterBinding::from_parameter(BindingType::SmartNull, TypeMapping::Text, "name");
        let template = SqlTemplate::builder()
            .text("SELECT id FROM customer WHERE ")
            .branch(
                name.id(),
                SqlTemplate::builder().text("name = ").placeholder(name.id()).build(),
                SqlTemplate::text("name IS NULL"),
            )
            .build();
        let request = QueryRequest::new(template, vec![name], vec![TypeMapping::Integer]);

        let part = factory
            .create_query_part(&request, "p0_", &ParameterContext::new().with("name", Value::Null))
            .unwrap();
        assert_eq!(part.statement(), "SELECT id FROM customer WHERE name IS NULL");
        assert_eq!(part.parameter_count(), 0);

        let part = factory
            .create_query_part(&request, "p0_", &ParameterContext::new().with("name", Value::from("")))
            .unwrap();
        assert_eq!(part.statement(), "SELECT id FROM customer WHERE name = @p0_0");
    }

    #[test]
    fn test_empty_string_is_null_when_provider_says_so() {
        let driver = SqliteDriver::open_in_memory()
            .unwrap()
            .with_provider_info(ProviderInfo::default().with_empty_string_is_null(true));
        let factory = CommandFactory::new(Arc::new(driver));

        assert!(factory.is_handled_like_null(&Value::from("")));
        assert!(!factory.is_handled_like_null(&Value::from(" ")));
        assert!(!factory.is_handled_like_null(&Value::Integer(0)));
    }

    #[test]
    fn test_limit_bindings_are_inlined() {
        let factory = factory();
        let limit = QueryParameterBinding::from_parameter(BindingType::LimitOffset, TypeMapping::Integer, "limit");
        let skip =
            QueryParameterBinding::from_parameter(BindingType::NonZeroLimitOffset, TypeMapping::Integer, "skip");
        let template = SqlTemplate::builder()
            .text("SELECT id FROM t LIMIT ")
            .placeholder(limit.id())
            .branch(
                skip.id(),
                SqlTemplate::builder().text(" OFFSET ").placeholder(skip.id()).build(),
                SqlTemplate::builder().text(" OFFSET ").placeholder(skip.id()).text(" - 1").build(),
            )
            .build();
        let request = QueryRequest::new(template, vec![limit, skip], vec![TypeMapping::Integer]);

        let context = ParameterContext::new()
            .with("limit", Value::Integer(10))
            .with("skip", Value::Integer(0));
        let part = factory.create_query_part(&request, "p0_", &context).unwrap();
        assert_eq!(part.statement(), "SELECT id FROM t LIMIT 10 OFFSET 1 - 1");
        assert_eq!(part.parameter_count(), 0);

        let context = ParameterContext::new()
            .with("limit", Value::Integer(10))
            .with("skip", Value::Integer(5));
        let part = factory.create_query_part(&request, "p0_", &context).unwrap();
        assert_eq!(part.statement(), "SELECT id FROM t LIMIT 10 OFFSET 5");
    }

    #[test]
    fn test_boolean_constant_never_binds() {
        let factory = factory();
        let flag =
            QueryParameterBinding::from_parameter(BindingType::BooleanConstant, TypeMapping::Boolean, "flag");
        let template = SqlTemplate::builder()
            .text("SELECT id FROM t WHERE ")
            .branch(flag.id(), SqlTemplate::text("1 = 0"), SqlTemplate::text("1 = 1"))
            .build();
        let request = QueryRequest::new(template, vec![flag], vec![TypeMapping::Integer]);

        let part = factory
            .create_query_part(&request, "p0_", &ParameterContext::new().with("flag", Value::Boolean(true)))
            .unwrap();
        assert_eq!(part.statement(), "SELECT id FROM t WHERE 1 = 1");
        assert_eq!(part.parameter_count(), 0);
    }

    #[test]
    fn test_row_filter_expands_cells() {
        let factory = factory();
        let keys = QueryParameterBinding::row_filter(vec![TypeMapping::Integer, TypeMapping::Text], "keys");
        let template = SqlTemplate::builder()
            .text("SELECT id FROM t WHERE ")
            .branch(
                keys.id(),
                SqlTemplate::builder().row_filter(keys.id(), ["id", "code"]).build(),
                SqlTemplate::text("1 = 1"),
            )
            .build();
        let request = QueryRequest::new(template, vec![keys], vec![TypeMapping::Integer]);

        let rows = vec![
            Tuple::from_values(vec![Value::Integer(1), Value::from("a")]),
            Tuple::from_values(vec![Value::Integer(2), Value::from("b")]),
        ];
        let part = factory
            .create_query_part(&request, "p1_", &ParameterContext::new().with("keys", rows))
            .unwrap();
        assert_eq!(
            part.statement(),
            "SELECT id FROM t WHERE (id, code) IN ((@p1_0_0_0, @p1_0_0_1), (@p1_0_1_0, @p1_0_1_1))"
        );
        assert_eq!(part.parameter_count(), 4);
        assert_eq!(part.parameters()[3], Parameter::new("p1_0_1_1", Value::from("b")));

        // An empty list keeps the main branch with an empty grid.
        let part = factory
            .create_query_part(&request, "p1_", &ParameterContext::new().with("keys", Vec::<Tuple>::new()))
            .unwrap();
        assert_eq!(part.statement(), "SELECT id FROM t WHERE 1 = 0");
        assert_eq!(part.parameter_count(), 0);

        // No list at all takes the alternative branch.
        let part = factory
            .create_query_part(
                &request,
                "p1_",
                &ParameterContext::new().with("keys", BindingValue::Rows(None)),
            )
            .unwrap();
        assert_eq!(part.statement(), "SELECT id FROM t WHERE 1 = 1");
    }

    #[test]
    fn test_type_identifier_resolves_through_registry() {
        let factory = factory().with_type_ids(TypeIdRegistry::new().with("Customer", 101));
        let kind = QueryParameterBinding::from_parameter(BindingType::TypeIdentifier, TypeMapping::Integer, "kind");
        let template = SqlTemplate::builder()
            .text("SELECT id FROM entity WHERE type_id = ")
            .placeholder(kind.id())
            .build();
        let request = QueryRequest::new(template, vec![kind], vec![TypeMapping::Integer]);

        let part = factory
            .create_query_part(&request, "p0_", &ParameterContext::new().with("kind", Value::from("Customer")))
            .unwrap();
        assert_eq!(part.parameters(), &[Parameter::new("p0_0", Value::Integer(101))]);

        let err = factory
            .create_query_part(&request, "p0_", &ParameterContext::new().with("kind", Value::from("Order")))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownType(name) if name == "Order"));
    }

    #[test]
    fn test_query_rejects_version_filter_and_wraps_accessor_failures() {
        let factory = factory();
        let version = QueryParameterBinding::from_parameter(BindingType::VersionFilter, TypeMapping::Integer, "v");
        let request = QueryRequest::new(SqlTemplate::text("SELECT 1"), vec![version], vec![TypeMapping::Integer]);
        let err = factory
            .create_query_part(&request, "p0_", &ParameterContext::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedBindingType {
                binding_type: BindingType::VersionFilter,
                usage: "query"
            }
        ));

        let missing = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Integer, "missing");
        let id = missing.id();
        let request = QueryRequest::new(SqlTemplate::text("SELECT 1"), vec![missing], vec![TypeMapping::Integer]);
        let err = factory
            .create_query_part(&request, "p0_", &ParameterContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::ParameterResolution { binding, .. } if binding == id));
    }

    #[test]
    fn test_persist_parts_continue_numbering_and_honor_version_filter() {
        let factory = factory();

        let name = PersistParameterBinding::new(TypeMapping::Text, 1);
        let key = PersistParameterBinding::new(TypeMapping::Integer, 0);
        let version = PersistParameterBinding::version_filter(TypeMapping::Integer, 2);
        let update = PersistRequest::new(
            SqlTemplate::builder()
                .text("UPDATE customer SET name = ")
                .placeholder(name.id())
                .text(" WHERE id = ")
                .placeholder(key.id())
                .text(" AND ")
                .branch(
                    version.id(),
                    SqlTemplate::builder().text("version = ").placeholder(version.id()).build(),
                    SqlTemplate::text("version IS NULL"),
                )
                .build(),
            vec![name, key, version],
        );
        let audit_key = PersistParameterBinding::new(TypeMapping::Integer, 0);
        let audit = PersistRequest::new(
            SqlTemplate::builder()
                .text("INSERT INTO audit (customer_id) VALUES (")
                .placeholder(audit_key.id())
                .text(")")
                .build(),
            vec![audit_key],
        );

        let task = SqlPersistTask::new(
            "Customer(7)",
            vec![Arc::new(update), Arc::new(audit)],
            Tuple::from_values(vec![Value::Integer(7), Value::from("Ann"), Value::Integer(4)]),
        )
        .with_original(Tuple::from_values(vec![Value::Integer(7), Value::from("An"), Value::Integer(3)]));

        let parts = factory.create_persist_parts(&task, "p2_").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].statement(),
            "UPDATE customer SET name = @p2_0 WHERE id = @p2_1 AND version = @p2_2"
        );
        assert_eq!(parts[0].parameters()[2].value(), &Value::Integer(3));
        assert_eq!(parts[1].statement(), "INSERT INTO audit (customer_id) VALUES (@p2_3)");

        let without_version = task
            .clone()
            .with_original(Tuple::from_values(vec![Value::Integer(7), Value::from("An"), Value::Null]));
        let parts = factory.create_persist_parts(&without_version, "p2_").unwrap();
        assert!(parts[0].statement().ends_with("version IS NULL"));
        assert_eq!(parts[0].parameter_count(), 2);
    }

    #[test]
    fn test_persist_rejects_query_only_bindings() {
        let factory = factory();
        let binding = PersistParameterBinding::new(TypeMapping::Integer, 0).with_binding_type(BindingType::RowFilter);
        let request = PersistRequest::new(SqlTemplate::text("DELETE FROM t"), vec![binding]);
        let task = SqlPersistTask::new("T(1)", vec![Arc::new(request)], Tuple::from_values(vec![Value::Integer(1)]));

        let err = factory.create_persist_parts(&task, "p0_").unwrap_err();
        assert!(err.is_misuse());
    }

    #[test]
    fn test_lob_bindings_become_part_resources() {
        let factory = factory();
        let body = PersistParameterBinding::new(TypeMapping::Text, 1).with_transmission(TransmissionType::CharacterLob);
        let request = PersistRequest::new(
            SqlTemplate::builder()
                .text("INSERT INTO doc (body) VALUES (")
                .placeholder(body.id())
                .text(")")
                .build(),
            vec![body],
        );
        let task = SqlPersistTask::new(
            "Doc(1)",
            vec![Arc::new(request)],
            Tuple::from_values(vec![Value::Integer(1), Value::from("hello")]),
        );

        let parts = factory.create_persist_parts(&task, "p0_").unwrap();
        assert_eq!(parts[0].resources().len(), 1);
        assert_eq!(parts[0].parameters(), &[Parameter::new("p0_0", Value::from("hello"))]);
    }

    #[test]
    fn test_lob_values_are_written_in_blocks() {
        let mut lob = RecordingLob::default();
        let text: String = "é".repeat(LOB_BLOCK_SIZE * 2 + 10);
        write_character_lob(&mut lob, &Value::Text(text)).unwrap();
        assert_eq!(lob.blocks, vec![LOB_BLOCK_SIZE, LOB_BLOCK_SIZE, 10]);

        let mut lob = RecordingLob::default();
        write_binary_lob(&mut lob, &Value::Blob(vec![0u8; LOB_BLOCK_SIZE + 1])).unwrap();
        assert_eq!(lob.blocks, vec![LOB_BLOCK_SIZE, 1]);

        let mut lob = RecordingLob::default();
        write_character_lob(&mut lob, &Value::from("")).unwrap();
        assert!(lob.erased);
        assert!(lob.blocks.is_empty());

        let mut lob = RecordingLob::default();
        write_binary_lob(&mut lob, &Value::Null).unwrap();
        assert!(lob.erased);
    }
}
