//! Data-Parser Bridge
//!
//! ## Overview
//!
//! Turns a byte stream (an HTTP response body, an MQTT payload, a WebSocket
//! frame) into a lazy, finite sequence of records:
//!
//! ```text
//! Box<dyn Read> ──▶ RecordReaderFactory::create_reader ──▶ RecordReader
//!                                                          read_record() → Some(record)
//!                                                          read_record() → Some(record)
//!                                                          read_record() → None   (exhausted)
//! ```
//!
//! Readers are not restartable. After an error they yield nothing more.
//! Record ids are `<message_id>::<n>` with `n` counting from zero.
//!
//! ## Formats
//!
//! | Format | Unit | Options |
//! |--------|------|---------|
//! | `JSON` | one JSON value per record | `jsonContent`: `MULTIPLE_OBJECTS` (whitespace separated values) or `ARRAY_OBJECTS` (elements of top-level arrays) |
//! | `TEXT` | one line per record in field `/text` | `textMaxLineLen` (default 1024); longer lines are cut and marked `truncated=true` |

mod json;
mod text;

use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::StageContext;
use crate::errors::ParseError;
use crate::record::Record;

pub use json::JsonRecordReader;
pub use text::TextRecordReader;

/// Default cut-off for `TEXT` lines
pub const DEFAULT_TEXT_MAX_LINE_LEN: usize = 1024;

/// Header attribute set on truncated `TEXT` records
pub const TRUNCATED_ATTRIBUTE: &str = "truncated";

/// Payload format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFormat {
    /// JSON values
    #[default]
    Json,
    /// Newline-delimited text
    Text,
}

/// Layout of `JSON` payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JsonContent {
    /// Whitespace separated top-level values
    #[default]
    MultipleObjects,
    /// Top-level arrays whose elements are records
    ArrayObjects,
}

/// Format options (`conf.dataFormatConfig.*`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataParserConfig {
    /// JSON layout
    pub json_content: JsonContent,
    /// Accepted for compatibility, not enforced
    pub json_max_object_len: usize,
    /// Longest `TEXT` line kept, in characters
    pub text_max_line_len: usize,
}

impl Default for DataParserConfig {
    fn default() -> Self {
        Self {
            json_content: JsonContent::MultipleObjects,
            json_max_object_len: 4096,
            text_max_line_len: DEFAULT_TEXT_MAX_LINE_LEN,
        }
    }
}

/// Lazy record iterator over a byte stream
pub trait RecordReader: Send {
    /// Next record, `Ok(None)` once exhausted
    fn read_record(&mut self) -> Result<Option<Record>, ParseError>;

    /// Release the underlying stream
    fn close(&mut self);
}

/// Builds readers for one configured format
#[derive(Debug, Clone, Default)]
pub struct RecordReaderFactory {
    format: DataFormat,
    config: DataParserConfig,
}

impl RecordReaderFactory {
    /// Factory for a format and its options
    pub fn new(format: DataFormat, config: DataParserConfig) -> Self {
        Self { format, config }
    }

    /// Configured format
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Wrap `input` in a reader; records are created through `context`
    pub fn create_reader(
        &self,
        context: Arc<dyn StageContext>,
        message_id: &str,
        input: Box<dyn Read + Send>,
    ) -> Box<dyn RecordReader> {
        match self.format {
            DataFormat::Json => Box::new(JsonRecordReader::new(
                context,
                message_id,
                input,
                self.config.json_content,
            )),
            DataFormat::Text => Box::new(TextRecordReader::new(
                context,
                message_id,
                input,
                self.config.text_max_line_len,
            )),
        }
    }

    /// Reader over an in-memory payload
    pub fn create_reader_from_bytes(
        &self,
        context: Arc<dyn StageContext>,
        message_id: &str,
        payload: Vec<u8>,
    ) -> Box<dyn RecordReader> {
        self.create_reader(context, message_id, Box::new(std::io::Cursor::new(payload)))
    }
}

/// Read every remaining record
pub fn read_all(reader: &mut dyn RecordReader) -> Result<Vec<Record>, ParseError> {
    let mut records = Vec::new();
    while let Some(record) = reader.read_record()? {
        records.push(record);
    }
    Ok(records)
}

fn record_id(message_id: &str, counter: usize) -> String {
    format!("{}::{}", message_id, counter)
}
