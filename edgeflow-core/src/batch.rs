//! Batches and Batch Makers
//!
//! A [`Batch`] is what the runner hands from one stage to the next: an
//! ordered list of records plus the offset of the origin call that produced
//! it. Stages never build batches directly; they write into a
//! [`BatchMaker`], which the runner turns into the next batch.

use crate::record::Record;

/// Ordered finite sequence of records with an origin offset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    source_offset: Option<String>,
    records: Vec<Record>,
}

impl Batch {
    /// Create a batch
    pub fn new(source_offset: Option<String>, records: Vec<Record>) -> Self {
        Self {
            source_offset,
            records,
        }
    }

    /// Offset returned by the origin for this batch
    pub fn source_offset(&self) -> Option<&str> {
        self.source_offset.as_deref()
    }

    /// Records in production order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Take ownership of the records
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Write-only accumulator for a stage's output
///
/// Records become visible to the next stage in the order they were added.
pub trait BatchMaker {
    /// Append a record to the output
    fn add_record(&mut self, record: Record);

    /// Number of records added so far
    fn len(&self) -> usize;

    /// Whether nothing was added yet
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`BatchMaker`]
#[derive(Debug, Default)]
pub struct RecordBatchMaker {
    records: Vec<Record>,
}

impl RecordBatchMaker {
    /// Create an empty maker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records added so far
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Finish the batch with the given offset
    pub fn into_batch(self, source_offset: Option<String>) -> Batch {
        Batch::new(source_offset, self.records)
    }
}

impl BatchMaker for RecordBatchMaker {
    fn add_record(&mut self, record: Record) {
        self.records.push(record);
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
