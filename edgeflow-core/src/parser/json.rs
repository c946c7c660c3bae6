use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::sync::Arc;

use serde_json::de::IoRead;
use serde_json::{Deserializer, StreamDeserializer, Value};

use super::{record_id, JsonContent, RecordReader};
use crate::context::StageContext;
use crate::errors::ParseError;
use crate::record::{Field, Record};

type ValueStream = StreamDeserializer<'static, IoRead<BufReader<Box<dyn Read + Send>>>, Value>;

/// Streaming JSON reader
///
/// Top-level values are pulled one at a time; in `ARRAY_OBJECTS` mode the
/// elements of each top-level array are queued and handed out in order.
pub struct JsonRecordReader {
    context: Arc<dyn StageContext>,
    message_id: String,
    content: JsonContent,
    stream: Option<ValueStream>,
    pending: VecDeque<Value>,
    counter: usize,
    failed: bool,
}

impl JsonRecordReader {
    /// Reader over `input`
    pub fn new(
        context: Arc<dyn StageContext>,
        message_id: &str,
        input: Box<dyn Read + Send>,
        content: JsonContent,
    ) -> Self {
        let stream = Deserializer::from_reader(BufReader::new(input)).into_iter::<Value>();
        Self {
            context,
            message_id: message_id.to_string(),
            content,
            stream: Some(stream),
            pending: VecDeque::new(),
            counter: 0,
            failed: false,
        }
    }

    fn next_value(&mut self) -> Result<Option<Value>, ParseError> {
        loop {
            if let Some(value) = self.pending.pop_front() {
                return Ok(Some(value));
            }
            let stream = self.stream.as_mut().ok_or(ParseError::Closed)?;
            match stream.next() {
                None => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Value::Array(items))) if self.content == JsonContent::ArrayObjects => {
                    self.pending.extend(items);
                }
                Some(Ok(value)) => return Ok(Some(value)),
            }
        }
    }
}

impl RecordReader for JsonRecordReader {
    fn read_record(&mut self) -> Result<Option<Record>, ParseError> {
        if self.failed {
            return Ok(None);
        }
        match self.next_value() {
            Ok(Some(value)) => {
                let id = record_id(&self.message_id, self.counter);
                self.counter += 1;
                Ok(Some(self.context.create_record(&id, Field::from(value))))
            }
            Ok(None) => Ok(None),
            Err(ParseError::Closed) => Err(ParseError::Closed),
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::context::RuntimeContext;

    fn reader(input: &str, content: JsonContent) -> JsonRecordReader {
        let context: Arc<dyn StageContext> = Arc::new(RuntimeContext::new("test", StageConfig::default()));
        JsonRecordReader::new(context, "msg", Box::new(std::io::Cursor::new(input.to_string())), content)
    }

    #[test]
    fn test_multiple_objects() {
        let mut reader = reader("{\"a\":1}\n{\"a\":2} {\"a\":3}", JsonContent::MultipleObjects);
        let mut ids = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            ids.push(record.header().source_id.clone());
        }
        assert_eq!(ids, vec!["msg::0", "msg::1", "msg::2"]);
    }

    #[test]
    fn test_array_objects() {
        let mut reader = reader("[{\"a\":1},{\"a\":2}]", JsonContent::ArrayObjects);
        assert_eq!(reader.read_record().unwrap().unwrap().get("/a"), Some(&Field::Integer(1)));
        assert_eq!(reader.read_record().unwrap().unwrap().get("/a"), Some(&Field::Integer(2)));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_input_fails_once() {
        let mut reader = reader("{\"a\":1}{\"b\":", JsonContent::MultipleObjects);
        assert!(reader.read_record().unwrap().is_some());
        let err = reader.read_record().unwrap_err();
        assert!(err.to_string().contains("unexpected EOF"));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_empty_input_is_exhausted() {
        let mut reader = reader("  \n", JsonContent::MultipleObjects);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_read_after_close() {
        let mut reader = reader("{}", JsonContent::MultipleObjects);
        reader.close();
        assert!(matches!(reader.read_record(), Err(ParseError::Closed)));
    }
}
