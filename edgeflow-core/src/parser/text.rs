use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

use super::{record_id, RecordReader, TRUNCATED_ATTRIBUTE};
use crate::context::StageContext;
use crate::errors::ParseError;
use crate::record::{Field, FieldMap, Record};

/// Line-oriented reader producing `{"text": <line>}` records
pub struct TextRecordReader {
    context: Arc<dyn StageContext>,
    message_id: String,
    input: Option<BufReader<Box<dyn Read + Send>>>,
    max_line_len: usize,
    counter: usize,
    failed: bool,
}

impl TextRecordReader {
    /// Reader over `input` cutting lines at `max_line_len` characters
    pub fn new(
        context: Arc<dyn StageContext>,
        message_id: &str,
        input: Box<dyn Read + Send>,
        max_line_len: usize,
    ) -> Self {
        Self {
            context,
            message_id: message_id.to_string(),
            input: Some(BufReader::new(input)),
            max_line_len,
            counter: 0,
            failed: false,
        }
    }
}

/// Drop input up to and including the next newline
fn skip_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let available = input.fill_buf()?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                input.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                input.consume(len);
            }
        }
    }
}

impl RecordReader for TextRecordReader {
    fn read_record(&mut self) -> Result<Option<Record>, ParseError> {
        if self.failed {
            return Ok(None);
        }
        let input = self.input.as_mut().ok_or(ParseError::Closed)?;
        // a char is at most 4 bytes, plus room for "\r\n"
        let cap = self.max_line_len.saturating_mul(4).saturating_add(2);
        let mut buf = Vec::new();
        let read = match (&mut *input).take(cap as u64).read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(None),
            Ok(read) => read,
            Err(err) => {
                self.failed = true;
                return Err(err.into());
            }
        };
        let overflow = read == cap && buf.last() != Some(&b'\n');
        if overflow {
            if let Err(err) = skip_line(input) {
                self.failed = true;
                return Err(err.into());
            }
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }

        let mut line = String::from_utf8_lossy(&buf).into_owned();
        let truncated = match line.char_indices().nth(self.max_line_len) {
            Some((cut, _)) => {
                line.truncate(cut);
                true
            }
            None => overflow,
        };

        let mut root = FieldMap::new();
        root.insert("text".to_string(), Field::Text(line));
        let id = record_id(&self.message_id, self.counter);
        self.counter += 1;
        let mut record = self.context.create_record(&id, Field::Map(root));
        if truncated {
            record.set_attribute(TRUNCATED_ATTRIBUTE, "true");
        }
        Ok(Some(record))
    }

    fn close(&mut self) {
        self.input = None;
    }
}
