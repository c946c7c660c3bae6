use std::sync::Arc;

use log::trace;

use crate::batch::Batch;
use crate::context::StageContext;
use crate::errors::{StageError, StageResult};
use crate::stage::{Destination, Issue, Lifecycle, StageBase};

/// Serialises every record and drops it
#[derive(Debug, Default)]
pub struct TrashDestination {
    base: StageBase,
}

impl TrashDestination {
    /// New, uninitialised destination
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lifecycle for TrashDestination {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.base.detach();
    }
}

impl Destination for TrashDestination {
    fn write(&mut self, batch: &Batch) -> StageResult<()> {
        let context = self.base.context()?;
        for record in batch.records() {
            match record.to_json() {
                Ok(bytes) => trace!("dropped record '{}' ({} bytes)", record.header().source_id, bytes.len()),
                Err(err) => context.to_error(StageError::Serialization(err.to_string()), record.clone()),
            }
        }
        Ok(())
    }
}
