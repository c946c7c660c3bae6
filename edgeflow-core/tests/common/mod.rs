//! Shared helpers for core integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use edgeflow_core::{
    BatchMaker, Issue, Lifecycle, Origin, RuntimeContext, StageConfig, StageContext, StageResult,
};

/// Context with no options
pub fn context(name: &str) -> Arc<RuntimeContext> {
    Arc::new(RuntimeContext::new(name, StageConfig::default()))
}

/// Origin recording the calls it receives
#[derive(Default)]
pub struct RecordingOrigin {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub issues: Vec<Issue>,
}

impl RecordingOrigin {
    pub fn failing(message: &str) -> Self {
        Self {
            calls: Arc::default(),
            issues: vec![Issue::stage(message)],
        }
    }
}

impl Lifecycle for RecordingOrigin {
    fn init(&mut self, _context: Arc<dyn StageContext>) -> Vec<Issue> {
        self.calls.lock().unwrap().push("init");
        self.issues.clone()
    }

    fn destroy(&mut self) {
        self.calls.lock().unwrap().push("destroy");
    }
}

impl Origin for RecordingOrigin {
    fn produce(
        &mut self,
        _last_offset: Option<&str>,
        _max_batch_size: usize,
        _batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        self.calls.lock().unwrap().push("produce");
        Ok(Some("recording".to_string()))
    }
}
