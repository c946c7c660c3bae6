//! Error Types for Stage Execution
//!
//! ## Error Taxonomy
//!
//! Failures inside a pipeline fall into five semantic kinds. Only some of
//! them are represented by the types in this module:
//!
//! | Kind | Surface | Effect |
//! |------|---------|--------|
//! | Configuration issue | [`Issue`](crate::stage::Issue) returned from `init` | Stage never becomes initialised |
//! | Stage-level error | [`StageError`] passed to `report_error` | Logged to the error sink, stage continues |
//! | Record-level error | [`StageError`] passed to `to_error` with the record | Record diverted to the error stream |
//! | Batch-fatal error | `Err(StageError)` from `produce`/`process`/`write` | Current batch attempt fails |
//! | Programmer error | `panic!` | Unknown registry key, misuse of internal channels |
//!
//! ## User-Visible Messages
//!
//! Several messages are part of the external contract and are preserved
//! verbatim by the `Display` impls below:
//!
//! ```text
//! Error fetching resource. Status Code: <status>, Reason: <body>
//! Error executing request: <cause>
//! Failed to parse raw data: <cause>
//! connection closed, code: <n>, message: <m>
//! Batch Mode is not supported
//! ```

use thiserror::Error;

/// Result type for stage operations
pub type StageResult<T> = Result<T, StageError>;

/// Errors raised while a stage runs
#[derive(Debug, Error)]
pub enum StageError {
    /// Transport-level failure while executing a request
    #[error("Error executing request: {0}")]
    Request(String),

    /// Remote endpoint answered with a non-success status
    #[error("Error fetching resource. Status Code: {status}, Reason: {reason}")]
    Status {
        /// Status line, e.g. `500 Internal Server Error`
        status: String,
        /// Response body, read to the end
        reason: String,
    },

    /// Payload could not be turned into records
    #[error("Failed to parse raw data: {0}")]
    Parse(#[from] ParseError),

    /// Remote peer closed a streaming connection
    #[error("connection closed, code: {code}, message: {message}")]
    ConnectionClosed {
        /// Close code sent by the peer
        code: u16,
        /// Close reason sent by the peer
        message: String,
    },

    /// `BATCH` mode of the HTTP client origin
    #[error("Batch Mode is not supported")]
    BatchModeUnsupported,

    /// Expression evaluation failed
    #[error(transparent)]
    Evaluation(#[from] ElError),

    /// Record could not be serialised
    #[error("Failed to serialize record: {0}")]
    Serialization(String),

    /// Operation called in a lifecycle state that does not allow it
    #[error("Illegal lifecycle transition: cannot {operation} a stage that is {state}")]
    IllegalState {
        /// Attempted operation
        operation: &'static str,
        /// Lifecycle state at the time of the call
        state: &'static str,
    },

    /// Output path could not be written into the record
    #[error("Cannot write field '{0}'")]
    InvalidField(String),

    /// Stage used as a variant it is not
    #[error("Stage is not a {0}")]
    WrongVariant(&'static str),

    /// Protocol or transport failure that has no dedicated variant
    #[error("{0}")]
    Transport(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by record readers
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input ended in the middle of a value
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// Malformed JSON
    #[error("{0}")]
    Json(String),

    /// Reading the underlying stream failed
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Reader was used after `close`
    #[error("reader is closed")]
    Closed,
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() {
            ParseError::UnexpectedEof
        } else if err.is_io() {
            ParseError::Io(err.into())
        } else {
            ParseError::Json(err.to_string())
        }
    }
}

/// Errors produced by the expression evaluator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElError {
    /// Expression text could not be parsed
    #[error("Invalid expression '{expression}': {message}")]
    Syntax {
        /// Offending expression
        expression: String,
        /// What went wrong
        message: String,
    },

    /// Identifier has no binding in the variable bag
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    /// Function name not known to the evaluator
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Function called with the wrong arguments
    #[error("Invalid arguments for '{function}': {message}")]
    InvalidArguments {
        /// Called function
        function: String,
        /// What went wrong
        message: String,
    },

    /// `record:` function used without a bound record
    #[error("No record bound for '{0}'")]
    NoRecord(String),

    /// Operator applied to incompatible operands
    #[error("Cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        /// Operator symbol
        operator: char,
        /// Left operand type
        left: &'static str,
        /// Right operand type
        right: &'static str,
    },

    /// Failure attributed to a named configuration
    #[error("Failed to evaluate '{config}': {source}")]
    Config {
        /// Configuration name the expression came from
        config: String,
        /// Underlying evaluation error
        #[source]
        source: Box<ElError>,
    },
}

/// Errors produced while binding stage configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Options under a prefix do not match the expected shape
    #[error("Invalid configuration '{prefix}': {message}")]
    Invalid {
        /// Option prefix being bound (e.g. `conf`)
        prefix: String,
        /// Deserializer message
        message: String,
    },

    /// Required option has no value
    #[error("Missing required configuration '{0}'")]
    Missing(String),
}

/// Errors produced by the stage registry
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// No factory registered under the key
    #[error("No stage registered as {library}:{stage_name}")]
    UnknownStage {
        /// Library part of the key
        library: String,
        /// Stage part of the key
        stage_name: String,
    },
}
