//! Stage Context and Error Sink
//!
//! ## Overview
//!
//! A stage sees the runtime only through [`StageContext`]. The context is
//! shared as `Arc<dyn StageContext>` because bridge producer threads report
//! errors from outside the runner's thread.
//!
//! [`RuntimeContext`] is the in-crate implementation. It holds the stage
//! configuration, the pipeline parameters visible to expressions, and an
//! [`ErrorSink`] collecting everything the stage reports:
//!
//! ```text
//!  stage ──report_error(err)──────────▶ ErrorSink.errors
//!        ──to_error(err, record)──────▶ ErrorSink.records  (header carries
//!                                                           message + stage)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::config::StageConfig;
use crate::el::{self, Constants, ElVars};
use crate::errors::{ElError, StageError};
use crate::record::{Field, Record};
use crate::stage::Issue;

/// Runtime services available to a stage
pub trait StageContext: Send + Sync {
    /// Name of the stage instance, used in error headers and logs
    fn stage_name(&self) -> &str;

    /// Options the stage was configured with
    fn stage_config(&self) -> &StageConfig;

    /// Resolve `${}` pipeline parameters in a configuration value
    fn resolved_value(&self, value: &str) -> Result<Field, ElError>;

    /// Create a record with the given identity
    fn create_record(&self, id: &str, root: Field) -> Record;

    /// Evaluate a per-record expression taken from `config_name`
    fn evaluate(&self, expression: &str, config_name: &str, vars: &ElVars) -> Result<Field, ElError>;

    /// Report a stage-level error; the stage keeps running
    fn report_error(&self, error: StageError);

    /// Divert a record to the error stream
    fn to_error(&self, error: StageError, record: Record);

    /// Build an init issue for a named configuration
    fn create_config_issue(&self, config_name: &str, message: &str) -> Issue {
        Issue::config(config_name, message)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collected stage-level errors and error records
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Mutex<Vec<StageError>>,
    records: Mutex<Vec<Record>>,
}

impl ErrorSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a stage-level error
    pub fn push_error(&self, error: StageError) {
        lock(&self.errors).push(error);
    }

    /// Store an error record
    pub fn push_record(&self, record: Record) {
        lock(&self.records).push(record);
    }

    /// Messages of the stage-level errors, oldest first
    pub fn error_messages(&self) -> Vec<String> {
        lock(&self.errors).iter().map(ToString::to_string).collect()
    }

    /// Remove and return the stage-level errors
    pub fn take_errors(&self) -> Vec<StageError> {
        std::mem::take(&mut *lock(&self.errors))
    }

    /// Error records, oldest first
    pub fn error_records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }

    /// Number of stage-level errors
    pub fn error_count(&self) -> usize {
        lock(&self.errors).len()
    }

    /// Drop everything collected so far
    pub fn clear(&self) {
        lock(&self.errors).clear();
        lock(&self.records).clear();
    }
}

/// Reference [`StageContext`] used by embedders and tests
#[derive(Debug, Default)]
pub struct RuntimeContext {
    stage_name: String,
    config: StageConfig,
    parameters: Constants,
    sink: ErrorSink,
}

impl RuntimeContext {
    /// Context for a stage instance
    pub fn new(stage_name: impl Into<String>, config: StageConfig) -> Self {
        Self {
            stage_name: stage_name.into(),
            config,
            parameters: Constants::new(),
            sink: ErrorSink::new(),
        }
    }

    /// Add a pipeline parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Pipeline parameters
    pub fn parameters(&self) -> &Constants {
        &self.parameters
    }

    /// Errors collected from the stage
    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }
}

impl StageContext for RuntimeContext {
    fn stage_name(&self) -> &str {
        &self.stage_name
    }

    fn stage_config(&self) -> &StageConfig {
        &self.config
    }

    fn resolved_value(&self, value: &str) -> Result<Field, ElError> {
        if !el::is_expression(value) {
            return Ok(Field::from(value));
        }
        el::evaluate(value, &ElVars::new(), &self.parameters)
    }

    fn create_record(&self, id: &str, root: Field) -> Record {
        Record::new(id, root)
    }

    fn evaluate(&self, expression: &str, config_name: &str, vars: &ElVars) -> Result<Field, ElError> {
        el::evaluate(expression, vars, &self.parameters).map_err(|e| ElError::Config {
            config: config_name.to_string(),
            source: Box::new(e),
        })
    }

    fn report_error(&self, error: StageError) {
        warn!("{}: {}", self.stage_name, error);
        self.sink.push_error(error);
    }

    fn to_error(&self, error: StageError, mut record: Record) {
        warn!(
            "{}: record '{}' routed to error: {}",
            self.stage_name,
            record.header().source_id,
            error
        );
        let header = record.header_mut();
        header.error_message = Some(error.to_string());
        header.error_stage = Some(self.stage_name.clone());
        self.sink.push_record(record);
    }
}
