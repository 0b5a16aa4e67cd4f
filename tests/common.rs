#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use spiteorm::config::ProviderInfo;
use spiteorm::driver::{DriverCommand, DriverReader, DriverResult, LargeObject, Parameter, SqliteDriver, StorageDriver};
use spiteorm::error::BoxError;
use spiteorm::statement::SqlTemplate;
use spiteorm::{
    BindingType, CommandFactory, Error, LoadOutput, ParameterContext, PersistParameterBinding, PersistRequest,
    QueryParameterBinding, QueryRequest, Result, SqlLoadTask, SqlPersistTask, TransmissionType, Tuple, TypeMapping,
    Value,
};

pub const SCHEMA: &str = "
    CREATE TABLE customer (
        id INTEGER PRIMARY KEY,
        name TEXT,
        version INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE audit (customer_id INTEGER NOT NULL, note TEXT);
    CREATE TABLE document (id INTEGER PRIMARY KEY, body TEXT);
";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Databases
// =============================================================================

pub fn customer_driver() -> SqliteDriver {
    let driver = SqliteDriver::open_in_memory().expect("open in-memory database");
    driver.execute_batch(SCHEMA).expect("create schema");
    driver
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let driver = SqliteDriver::open(&path).expect("open database file");
    driver.execute_batch(SCHEMA).expect("create schema");
    (dir, path)
}

pub fn seed_customers(driver: &SqliteDriver, count: i64) {
    for id in 1..=count {
        driver
            .execute_batch(&format!("INSERT INTO customer (id, name) VALUES ({id}, 'customer-{id}')"))
            .expect("seed customer");
    }
}

pub fn count_rows(driver: &SqliteDriver, table: &str) -> i64 {
    driver.with_connection(|conn| {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    })
}

pub fn with_parameter_limit(driver: SqliteDriver, limit: usize) -> SqliteDriver {
    driver.with_provider_info(ProviderInfo::default().with_max_query_parameter_count(Some(limit)))
}

// =============================================================================
// Requests and Tasks
// =============================================================================

pub fn load_customer_request() -> Arc<QueryRequest> {
    let id = QueryParameterBinding::from_parameter(BindingType::Regular, TypeMapping::Integer, "id");
    let template = SqlTemplate::builder()
        .text("SELECT id, name FROM customer WHERE id = ")
        .placeholder(id.id())
        .build();
    Arc::new(QueryRequest::new(
        template,
        vec![id],
        vec![TypeMapping::Integer, TypeMapping::Text],
    ))
}

pub fn load_customer(request: &Arc<QueryRequest>, id: i64) -> SqlLoadTask {
    SqlLoadTask::new(Arc::clone(request), ParameterContext::new().with("id", Value::Integer(id)))
}

/// Query over customers whose ids are in the `ids` row filter.
pub fn load_customers_in_request() -> Arc<QueryRequest> {
    let ids = QueryParameterBinding::row_filter(vec![TypeMapping::Integer], "ids");
    let template = SqlTemplate::builder()
        .text("SELECT id, name FROM customer WHERE ")
        .row_filter(ids.id(), ["id"])
        .text(" ORDER BY id")
        .build();
    Arc::new(QueryRequest::new(
        template,
        vec![ids],
        vec![TypeMapping::Integer, TypeMapping::Text],
    ))
}

pub fn all_customers_request() -> Arc<QueryRequest> {
    Arc::new(QueryRequest::new(
        SqlTemplate::text("SELECT id, name FROM customer ORDER BY id"),
        Vec::new(),
        vec![TypeMapping::Integer, TypeMapping::Text],
    ))
}

pub fn insert_customer_request() -> Arc<PersistRequest> {
    let id = PersistParameterBinding::new(TypeMapping::Integer, 0);
    let name = PersistParameterBinding::new(TypeMapping::Text, 1);
    let template = SqlTemplate::builder()
        .text("INSERT INTO customer (id, name) VALUES (")
        .placeholder(id.id())
        .text(", ")
        .placeholder(name.id())
        .text(")")
        .build();
    Arc::new(PersistRequest::new(template, vec![id, name]))
}

pub fn audit_request() -> Arc<PersistRequest> {
    let id = PersistParameterBinding::new(TypeMapping::Integer, 0);
    let note = PersistParameterBinding::new(TypeMapping::Text, 1);
    let template = SqlTemplate::builder()
        .text("INSERT INTO audit (customer_id, note) VALUES (")
        .placeholder(id.id())
        .text(", ")
        .placeholder(note.id())
        .text(")")
        .build();
    Arc::new(PersistRequest::new(template, vec![id, note]))
}

pub fn update_customer_request() -> Arc<PersistRequest> {
    let name = PersistParameterBinding::new(TypeMapping::Text, 1);
    let id = PersistParameterBinding::new(TypeMapping::Integer, 0);
    let version = PersistParameterBinding::version_filter(TypeMapping::Integer, 2);
    let template = SqlTemplate::builder()
        .text("UPDATE customer SET name = ")
        .placeholder(name.id())
        .text(", version = version + 1 WHERE id = ")
        .placeholder(id.id())
        .text(" AND ")
        .branch(
            version.id(),
            SqlTemplate::builder().text("version = ").placeholder(version.id()).build(),
            SqlTemplate::text("version IS NULL"),
        )
        .build();
    Arc::new(PersistRequest::new(template, vec![name, id, version]))
}

pub fn insert_document_request() -> Arc<PersistRequest> {
    let id = PersistParameterBinding::new(TypeMapping::Integer, 0);
    let body = PersistParameterBinding::new(TypeMapping::Text, 1).with_transmission(TransmissionType::CharacterLob);
    let template = SqlTemplate::builder()
        .text("INSERT INTO document (id, body) VALUES (")
        .placeholder(id.id())
        .text(", ")
        .placeholder(body.id())
        .text(")")
        .build();
    Arc::new(PersistRequest::new(template, vec![id, body]))
}

pub fn insert_customer(id: i64, name: &str) -> SqlPersistTask {
    SqlPersistTask::new(
        format!("Customer({id})"),
        vec![insert_customer_request()],
        Tuple::from_values(vec![Value::Integer(id), Value::from(name)]),
    )
}

/// Inserts a customer plus its audit row, as one two-part task.
pub fn insert_customer_with_audit(id: i64, name: &str) -> SqlPersistTask {
    SqlPersistTask::new(
        format!("Customer({id})"),
        vec![insert_customer_request(), audit_request()],
        Tuple::from_values(vec![Value::Integer(id), Value::from(name)]),
    )
}

/// Renames a customer if it still has `expected_version`.
pub fn rename_customer(id: i64, name: &str, expected_version: i64) -> SqlPersistTask {
    SqlPersistTask::new(
        format!("Customer({id})"),
        vec![update_customer_request()],
        Tuple::from_values(vec![Value::Integer(id), Value::from(name), Value::Null]),
    )
    .with_original(Tuple::from_values(vec![
        Value::Integer(id),
        Value::Null,
        Value::Integer(expected_version),
    ]))
    .with_row_count_validation(true)
}

pub fn insert_document(id: i64, body: &str) -> SqlPersistTask {
    SqlPersistTask::new(
        format!("Document({id})"),
        vec![insert_document_request()],
        Tuple::from_values(vec![Value::Integer(id), Value::from(body)]),
    )
}

/// Names collected by a load task, in row order.
pub fn names(output: &LoadOutput) -> Vec<Value> {
    output.lock().iter().map(|row| row.get_value_or_default(1)).collect()
}

pub fn expect_version_conflict(result: Result<()>, expected_key: &str) {
    match result {
        Err(Error::VersionConflict { entity_key }) => assert_eq!(entity_key, expected_key),
        other => panic!("expected version conflict, got {other:?}"),
    }
}

// =============================================================================
// Counting Driver
// =============================================================================

/// What the counting driver observed.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub commands_created: AtomicUsize,
    pub commands_closed: AtomicUsize,
    pub executions: AtomicUsize,
    pub max_parameters: AtomicUsize,
    pub lobs_created: AtomicUsize,
    pub lobs_disposed: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
}

impl DriverStats {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    pub fn max_parameters(&self) -> usize {
        self.max_parameters.load(Ordering::SeqCst)
    }

    /// Every created command was closed exactly once.
    pub fn all_commands_closed(&self) -> bool {
        self.commands_created.load(Ordering::SeqCst) == self.commands_closed.load(Ordering::SeqCst)
    }

    pub fn all_lobs_disposed(&self) -> bool {
        self.lobs_created.load(Ordering::SeqCst) == self.lobs_disposed.load(Ordering::SeqCst)
    }
}

/// Wraps a SQLite driver and records round-trips and disposals.
pub struct CountingDriver {
    inner: SqliteDriver,
    stats: Arc<DriverStats>,
}

/// A factory over `driver` that reports into the returned stats.
pub fn counting_factory(driver: SqliteDriver) -> (CommandFactory, Arc<DriverStats>) {
    let stats = Arc::new(DriverStats::default());
    let counting = CountingDriver {
        inner: driver,
        stats: Arc::clone(&stats),
    };
    (CommandFactory::new(Arc::new(counting)), stats)
}

impl StorageDriver for CountingDriver {
    fn provider_info(&self) -> &ProviderInfo {
        self.inner.provider_info()
    }

    fn create_command(&self) -> Result<Box<dyn DriverCommand>> {
        self.stats.commands_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingCommand {
            inner: self.inner.create_command()?,
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }

    fn build_batch(&self, statements: &[String]) -> String {
        self.inner.build_batch(statements)
    }

    fn build_parameter_reference(&self, name: &str) -> String {
        self.inner.build_parameter_reference(name)
    }

    fn create_character_lob(&self) -> Result<Box<dyn LargeObject>> {
        self.stats.lobs_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingLob {
            inner: self.inner.create_character_lob()?,
            stats: Arc::clone(&self.stats),
            disposed: false,
        }))
    }

    fn create_binary_lob(&self) -> Result<Box<dyn LargeObject>> {
        self.stats.lobs_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingLob {
            inner: self.inner.create_binary_lob()?,
            stats: Arc::clone(&self.stats),
            disposed: false,
        }))
    }

    fn build_exception(&self, error: BoxError, command_text: &str) -> Error {
        self.inner.build_exception(error, command_text)
    }
}

struct CountingCommand {
    inner: Box<dyn DriverCommand>,
    stats: Arc<DriverStats>,
    closed: bool,
}

impl CountingCommand {
    fn record(&self) {
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        self.stats
            .max_parameters
            .fetch_max(self.inner.parameters().len(), Ordering::SeqCst);
        self.stats.texts.lock().push(self.inner.command_text().to_string());
    }
}

#[async_trait]
impl DriverCommand for CountingCommand {
    fn set_command_text(&mut self, text: String) {
        self.inner.set_command_text(text);
    }

    fn command_text(&self) -> &str {
        self.inner.command_text()
    }

    fn add_parameter(&mut self, parameter: Parameter) {
        self.inner.add_parameter(parameter);
    }

    fn parameters(&self) -> &[Parameter] {
        self.inner.parameters()
    }

    fn execute_non_query(&mut self) -> DriverResult<u64> {
        self.record();
        self.inner.execute_non_query()
    }

    fn execute_reader(&mut self) -> DriverResult<Box<dyn DriverReader>> {
        self.record();
        self.inner.execute_reader()
    }

    async fn execute_non_query_async(&mut self) -> DriverResult<u64> {
        self.record();
        self.inner.execute_non_query_async().await
    }

    async fn execute_reader_async(&mut self) -> DriverResult<Box<dyn DriverReader>> {
        self.record();
        self.inner.execute_reader_async().await
    }

    fn close(&mut self) {
        assert!(!self.closed, "command closed twice");
        self.closed = true;
        self.stats.commands_closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }
}

struct CountingLob {
    inner: Box<dyn LargeObject>,
    stats: Arc<DriverStats>,
    disposed: bool,
}

impl LargeObject for CountingLob {
    fn write_chars(&mut self, chunk: &str) -> DriverResult<()> {
        self.inner.write_chars(chunk)
    }

    fn write_bytes(&mut self, chunk: &[u8]) -> DriverResult<()> {
        self.inner.write_bytes(chunk)
    }

    fn erase(&mut self) -> DriverResult<()> {
        self.inner.erase()
    }

    fn bind_to(&self, parameter_name: &str) -> Parameter {
        self.inner.bind_to(parameter_name)
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.stats.lobs_disposed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.dispose();
    }
}
