//! Core stage contract for EdgeFlow edge pipelines
//!
//! Holds everything a stage needs that is not tied to a protocol: the
//! record and batch model, the stage lifecycle, the registry, the
//! data-parser bridge and the expression evaluator.
//!
//! Key constraints:
//! - The runner invokes each stage serially
//! - Record order is preserved within and across stages
//! - Stages only talk to the runtime through [`StageContext`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgeflow_core::{registry, stages, RecordBatchMaker, RuntimeContext, StageConfig, StageInstance};
//!
//! stages::register_basic_stages();
//! let stage = registry::create_stage(stages::DEV_LIBRARY, stages::DEV_RANDOM_ORIGIN);
//! let mut instance = StageInstance::new(stage);
//!
//! let config = StageConfig::default().with("conf.fields", "a,b").with("conf.delay", 0.0);
//! let issues = instance.init(Arc::new(RuntimeContext::new("random", config))).unwrap();
//! assert!(issues.is_empty());
//!
//! let mut maker = RecordBatchMaker::new();
//! let offset = instance.produce(None, 10, &mut maker).unwrap();
//! instance.destroy();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod context;
pub mod el;
pub mod errors;
pub mod parser;
pub mod record;
pub mod registry;
pub mod stage;
pub mod stages;

// Public API
pub use batch::{Batch, BatchMaker, RecordBatchMaker};
pub use config::{ConfigOption, HeaderList, KeyValue, StageConfig};
pub use context::{ErrorSink, RuntimeContext, StageContext};
pub use el::ElVars;
pub use errors::{ConfigError, ElError, ParseError, RegistryError, StageError, StageResult};
pub use parser::{DataFormat, DataParserConfig, JsonContent, RecordReader, RecordReaderFactory};
pub use record::{Field, FieldMap, Header, Record};
pub use stage::{
    Destination, Issue, Lifecycle, LifecycleState, Origin, Processor, Stage, StageBase, StageInstance,
    StageKind,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
