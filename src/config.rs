//! # Configuration
//!
//! Two small structs configure the execution core:
//!
//! - [`ProviderInfo`]: what the storage provider can do. Reported by the
//!   driver, not chosen by the user.
//! - [`ProcessorConfig`]: how the session wants tasks scheduled.
//!
//! Both follow the same shape: public fields, a `Default` with the values
//! the engine ships with, and `with_*` builders for the common overrides.

/// Default number of tasks packed into one batch.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default bound-parameter ceiling for SQLite (`SQLITE_MAX_VARIABLE_NUMBER`
/// since SQLite 3.32).
pub const SQLITE_MAX_QUERY_PARAMETER_COUNT: usize = 32_766;

// =============================================================================
// Provider Info
// =============================================================================

/// Capabilities of the storage provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Maximum bound parameters in one command. `None` disables the limit.
    pub max_query_parameter_count: Option<usize>,

    /// Whether several DML statements may share one command.
    pub supports_dml_batches: bool,

    /// Whether the provider stores empty strings as NULL (Oracle does).
    pub empty_string_is_null: bool,
}

impl Default for ProviderInfo {
    fn default() -> Self {
        Self {
            max_query_parameter_count: None,
            supports_dml_batches: true,
            empty_string_is_null: false,
        }
    }
}

impl ProviderInfo {
    /// Sets the parameter ceiling.
    pub fn with_max_query_parameter_count(mut self, limit: Option<usize>) -> Self {
        self.max_query_parameter_count = limit;
        self
    }

    pub fn with_dml_batches(mut self, supported: bool) -> Self {
        self.supports_dml_batches = supported;
        self
    }

    pub fn with_empty_string_is_null(mut self, value: bool) -> Self {
        self.empty_string_is_null = value;
        self
    }
}

// =============================================================================
// Processor Configuration
// =============================================================================

/// Scheduling configuration for command processors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Tasks packed into one batch. Values below 2 disable batching.
    pub batch_size: usize,

    /// Master switch for batching, independent of provider support.
    pub enable_batching: bool,

    /// Partial execution for contexts built with
    /// [`CommandProcessorContext::with_config`](crate::processor::CommandProcessorContext::with_config).
    pub allow_partial_execution: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            enable_batching: true,
            allow_partial_execution: false,
        }
    }
}

impl ProcessorConfig {
    /// Sets the batch size, clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.enable_batching = enabled;
        self
    }

    pub fn with_partial_execution(mut self, allowed: bool) -> Self {
        self.allow_partial_execution = allowed;
        self
    }

    /// Whether a batching processor should be used with `provider`.
    pub fn uses_batching(&self, provider: &ProviderInfo) -> bool {
        self.enable_batching && self.batch_size > 1 && provider.supports_dml_batches
    }
}
