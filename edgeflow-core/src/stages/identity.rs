use std::sync::Arc;

use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::errors::StageResult;
use crate::stage::{Issue, Lifecycle, Processor, StageBase};

/// Emits a fresh record with the same root for every input record
#[derive(Debug, Default)]
pub struct IdentityProcessor {
    base: StageBase,
    counter: u64,
}

impl IdentityProcessor {
    /// New, uninitialised processor
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lifecycle for IdentityProcessor {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.base.detach();
    }
}

impl Processor for IdentityProcessor {
    fn process(&mut self, batch: &Batch, batch_maker: &mut dyn BatchMaker) -> StageResult<()> {
        let context = self.base.context()?;
        for record in batch.records() {
            let id = format!("identity::{}", self.counter);
            self.counter += 1;
            batch_maker.add_record(context.create_record(&id, record.value().clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RecordBatchMaker;
    use crate::config::StageConfig;
    use crate::context::RuntimeContext;
    use crate::record::{Field, Record};

    #[test]
    fn test_fresh_records_keep_roots() {
        let mut processor = IdentityProcessor::new();
        assert!(processor
            .init(Arc::new(RuntimeContext::new("identity", StageConfig::default())))
            .is_empty());

        let mut input = Record::new("in::0", Field::Integer(1));
        input.set_attribute("topic", "x");
        let batch = Batch::new(None, vec![input, Record::new("in::1", Field::Integer(2))]);
        let mut maker = RecordBatchMaker::new();
        processor.process(&batch, &mut maker).unwrap();

        let out = maker.records();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value(), &Field::Integer(1));
        assert_eq!(out[1].value(), &Field::Integer(2));
        assert_ne!(out[0].header().source_id, "in::0");
        assert_eq!(out[0].attribute("topic"), None);
    }
}
