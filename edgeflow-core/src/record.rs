//! Records and Typed Field Trees
//!
//! ## Overview
//!
//! A [`Record`] is the unit of data flowing between stages. It pairs a
//! [`Header`] (identity plus string attributes) with a root [`Field`]:
//!
//! ```text
//! Record
//! ├── Header
//! │   ├── source_id      "http::0"
//! │   ├── attributes     {"Content-Type": "application/json", ...}
//! │   └── error          (message, stage) once routed to error
//! └── Field (root)
//!     └── Map
//!         ├── "status" → Text("success")
//!         └── "values" → List[Integer(1), Integer(2)]
//! ```
//!
//! Maps keep insertion order so that textual encodings (JSON) come out the
//! way they were read.
//!
//! ## Field Paths
//!
//! Fields are addressed with slash paths: `/` is the root, `/a/b` descends
//! through maps and `/items[2]` indexes a list.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

/// Ordered map of field name to field
pub type FieldMap = IndexMap<String, Field>;

/// Typed field tree
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Absent value
    Null,
    /// Boolean leaf
    Boolean(bool),
    /// 64-bit integer leaf
    Integer(i64),
    /// 64-bit float leaf
    Float(f64),
    /// Text leaf
    Text(String),
    /// UTC timestamp leaf
    Timestamp(DateTime<Utc>),
    /// Ordered map of named fields
    Map(FieldMap),
    /// Ordered list of fields
    List(Vec<Field>),
}

impl Field {
    /// Name of the field type, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Field::Null => "NULL",
            Field::Boolean(_) => "BOOLEAN",
            Field::Integer(_) => "INTEGER",
            Field::Float(_) => "FLOAT",
            Field::Text(_) => "TEXT",
            Field::Timestamp(_) => "TIMESTAMP",
            Field::Map(_) => "MAP",
            Field::List(_) => "LIST",
        }
    }

    /// Borrow the text of a `Text` field
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integer and float fields
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Integer(i) => Some(*i as f64),
            Field::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the entries of a `Map` field
    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Field::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Render a scalar the way it appears inside text
    ///
    /// Maps and lists render as JSON.
    pub fn to_text(&self) -> String {
        match self {
            Field::Null => String::new(),
            Field::Boolean(b) => b.to_string(),
            Field::Integer(i) => i.to_string(),
            Field::Float(f) => f.to_string(),
            Field::Text(s) => s.clone(),
            Field::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::Millis, true),
            Field::Map(_) | Field::List(_) => Value::from(self).to_string(),
        }
    }

    /// Look up a nested field by path
    pub fn get(&self, path: &str) -> Option<&Field> {
        let mut current = self;
        for segment in FieldPath::parse(path)? {
            current = match (segment, current) {
                (PathSegment::Name(name), Field::Map(map)) => map.get(&name)?,
                (PathSegment::Index(idx), Field::List(list)) => list.get(idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a nested field by path, creating intermediate maps
    ///
    /// Returns `false` when the path is malformed or runs through a scalar
    /// or an out-of-range list index.
    pub fn set(&mut self, path: &str, value: Field) -> bool {
        let segments = match FieldPath::parse(path) {
            Some(segments) => segments,
            None => return false,
        };
        let mut current = self;
        for segment in segments {
            current = match segment {
                PathSegment::Name(name) => {
                    if !matches!(current, Field::Map(_)) {
                        if matches!(current, Field::Null) {
                            *current = Field::Map(FieldMap::new());
                        } else {
                            return false;
                        }
                    }
                    match current {
                        Field::Map(map) => map.entry(name).or_insert(Field::Null),
                        _ => return false,
                    }
                }
                PathSegment::Index(idx) => match current {
                    Field::List(list) if idx <= list.len() => {
                        if idx == list.len() {
                            list.push(Field::Null);
                        }
                        &mut list[idx]
                    }
                    _ => return false,
                },
            };
        }
        *current = value;
        true
    }
}

impl From<&Value> for Field {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Field::Null,
            Value::Bool(b) => Field::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Field::Integer(i),
                None => Field::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Field::Text(s.clone()),
            Value::Array(items) => Field::List(items.iter().map(Field::from).collect()),
            Value::Object(map) => Field::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Field::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::from(&value)
    }
}

impl From<&Field> for Value {
    fn from(field: &Field) -> Self {
        match field {
            Field::Null => Value::Null,
            Field::Boolean(b) => Value::Bool(*b),
            Field::Integer(i) => Value::from(*i),
            Field::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Field::Text(s) => Value::String(s.clone()),
            Field::Timestamp(_) => Value::String(field.to_text()),
            Field::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
            Field::List(items) => Value::Array(items.iter().map(Value::from).collect()),
        }
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Text(s.to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Text(s)
    }
}

impl From<i64> for Field {
    fn from(i: i64) -> Self {
        Field::Integer(i)
    }
}

impl From<f64> for Field {
    fn from(f: f64) -> Self {
        Field::Float(f)
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Field::Boolean(b)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Null => serializer.serialize_unit(),
            Field::Boolean(b) => serializer.serialize_bool(*b),
            Field::Integer(i) => serializer.serialize_i64(*i),
            Field::Float(f) => serializer.serialize_f64(*f),
            Field::Text(s) => serializer.serialize_str(s),
            Field::Timestamp(_) => serializer.serialize_str(&self.to_text()),
            Field::Map(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
            Field::List(items) => {
                let mut state = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    state.serialize_element(item)?;
                }
                state.end()
            }
        }
    }
}

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Map key
    Name(String),
    /// List index
    Index(usize),
}

/// Slash-separated field path parser
pub struct FieldPath;

impl FieldPath {
    /// Split a path into segments
    ///
    /// `"/"` and `""` address the root and yield no segments. Returns `None`
    /// for paths that do not start with `/` or carry a malformed index.
    pub fn parse(path: &str) -> Option<Vec<PathSegment>> {
        if path.is_empty() || path == "/" {
            return Some(Vec::new());
        }
        let rest = path.strip_prefix('/')?;
        let mut segments = Vec::new();
        for part in rest.split('/') {
            let (name, mut indexes) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                segments.push(PathSegment::Name(name.to_string()));
            }
            while !indexes.is_empty() {
                let close = indexes.find(']')?;
                let idx = indexes[1..close].parse().ok()?;
                segments.push(PathSegment::Index(idx));
                indexes = &indexes[close + 1..];
                if !indexes.is_empty() && !indexes.starts_with('[') {
                    return None;
                }
            }
        }
        Some(segments)
    }
}

/// Record header: identity, attributes and error details
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Identity assigned by the stage that created the record
    pub source_id: String,
    /// String attributes in insertion order
    pub attributes: IndexMap<String, String>,
    /// Error message once the record is routed to error
    pub error_message: Option<String>,
    /// Stage that routed the record to error
    pub error_stage: Option<String>,
}

/// Identified, header-bearing field tree
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    header: Header,
    value: Field,
}

impl Record {
    /// Create a record with the given identity and root field
    pub fn new(source_id: impl Into<String>, value: Field) -> Self {
        Self {
            header: Header {
                source_id: source_id.into(),
                ..Header::default()
            },
            value,
        }
    }

    /// Record header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable record header
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Root field
    pub fn value(&self) -> &Field {
        &self.value
    }

    /// Replace the root field
    pub fn set_value(&mut self, value: Field) {
        self.value = value;
    }

    /// Look up a field by path
    pub fn get(&self, path: &str) -> Option<&Field> {
        self.value.get(path)
    }

    /// Set a field by path, see [`Field::set`]
    pub fn set(&mut self, path: &str, value: Field) -> bool {
        self.value.set(path, value)
    }

    /// Read a header attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.header.attributes.get(name).map(String::as_str)
    }

    /// Write a header attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.header.attributes.insert(name.into(), value.into());
    }

    /// Serialise the root field as JSON
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.value)
    }
}
