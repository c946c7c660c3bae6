use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::batch::BatchMaker;
use crate::context::StageContext;
use crate::errors::StageResult;
use crate::record::{Field, FieldMap};
use crate::stage::{Issue, Lifecycle, Origin, StageBase};

/// Offset returned by every `produce`
pub const RANDOM_OFFSET: &str = "random";

/// Options under `conf.`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevRandomConfig {
    /// Comma separated field names
    pub fields: String,
    /// Pause after each batch, in milliseconds
    pub delay: u64,
}

impl Default for DevRandomConfig {
    fn default() -> Self {
        Self {
            fields: "a,b,c".to_string(),
            delay: 1000,
        }
    }
}

impl DevRandomConfig {
    fn field_names(&self) -> Vec<String> {
        self.fields
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Generates records of random integers
#[derive(Debug, Default)]
pub struct DevRandomOrigin {
    base: StageBase,
    fields: Vec<String>,
    delay: Duration,
    counter: u64,
}

impl DevRandomOrigin {
    /// New, uninitialised origin
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lifecycle for DevRandomOrigin {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: DevRandomConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        self.fields = config.field_names();
        if self.fields.is_empty() {
            return vec![context.create_config_issue("conf.fields", "at least one field name is required")];
        }
        self.delay = Duration::from_millis(config.delay);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.base.detach();
    }
}

impl Origin for DevRandomOrigin {
    fn produce(
        &mut self,
        _last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        let context = self.base.context()?;
        let mut rng = rand::thread_rng();
        for _ in 0..max_batch_size {
            let root: FieldMap = self
                .fields
                .iter()
                .map(|name| (name.clone(), Field::Integer(rng.gen())))
                .collect();
            let id = format!("{}::{}", RANDOM_OFFSET, self.counter);
            self.counter += 1;
            batch_maker.add_record(context.create_record(&id, Field::Map(root)));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(Some(RANDOM_OFFSET.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RecordBatchMaker;
    use crate::config::StageConfig;
    use crate::context::RuntimeContext;

    #[test]
    fn test_fills_batch_with_configured_fields() {
        let config = StageConfig::default()
            .with("conf.fields", "x, y")
            .with("conf.delay", 0.0);
        let mut origin = DevRandomOrigin::new();
        assert!(origin.init(Arc::new(RuntimeContext::new("random", config))).is_empty());

        let mut maker = RecordBatchMaker::new();
        let offset = origin.produce(None, 3, &mut maker).unwrap();
        assert_eq!(offset.as_deref(), Some("random"));
        assert_eq!(maker.len(), 3);
        for record in maker.records() {
            let keys: Vec<_> = record.value().as_map().unwrap().keys().cloned().collect();
            assert_eq!(keys, vec!["x", "y"]);
            assert!(matches!(record.get("/x"), Some(Field::Integer(_))));
        }
    }

    #[test]
    fn test_empty_field_list_is_an_issue() {
        let config = StageConfig::default().with("conf.fields", " , ");
        let issues = DevRandomOrigin::new().init(Arc::new(RuntimeContext::new("random", config)));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].config_name.as_deref(), Some("conf.fields"));
    }
}
