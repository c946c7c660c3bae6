//! Shared helpers for connector integration tests

#![allow(dead_code)]

use std::sync::Arc;

use edgeflow_core::{
    registry, stages, Record, RecordBatchMaker, RuntimeContext, StageConfig, StageInstance,
};

/// Runtime driving the mock servers
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

/// Registered stage, initialised with `config`; panics on init issues
pub fn init_stage(
    library: &str,
    stage_name: &str,
    context: RuntimeContext,
) -> (StageInstance, Arc<RuntimeContext>) {
    edgeflow_connectors::register_all();
    let context = Arc::new(context);
    let mut instance = StageInstance::new(registry::create_stage(library, stage_name));
    let issues = instance.init(context.clone()).unwrap();
    assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    (instance, context)
}

/// Basic-library stage with a plain context
pub fn basic_stage(stage_name: &str, config: StageConfig) -> (StageInstance, Arc<RuntimeContext>) {
    init_stage(stages::BASIC_LIBRARY, stage_name, RuntimeContext::new(stage_name, config))
}

/// Run one `produce` and return the offset and records
pub fn produce(instance: &mut StageInstance, max_batch_size: usize) -> (Option<String>, Vec<Record>) {
    let mut maker = RecordBatchMaker::new();
    let offset = instance.produce(None, max_batch_size, &mut maker).unwrap();
    (offset, maker.into_batch(None).into_records())
}
