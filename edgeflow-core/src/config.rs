//! Stage Configuration Envelope
//!
//! ## Overview
//!
//! The runner hands each stage an unordered list of `{name, value}`
//! options. Names are dotted paths (`conf.resourceUrl`,
//! `commonConf.qos`), values are JSON. Every number arrives as a 64-bit
//! float, even for integer settings such as QoS levels or retry counts.
//!
//! ## Binding
//!
//! Stages describe their settings as `serde` structs and bind them with
//! [`StageConfig::bind`]:
//!
//! ```text
//! conf.resourceUrl            = "http://host/data"
//! conf.basic.maxBatchSize     = 5.0
//! conf.client.authType        = "NONE"
//!
//!        ↓ bind("conf")
//!
//! { "resourceUrl": "http://host/data",
//!   "basic":  { "maxBatchSize": 5 },
//!   "client": { "authType": "NONE" } }
//! ```
//!
//! Floats without a fractional part are down-cast to integers before
//! deserialisation so `u8`/`u64` fields accept `1.0`. Unknown names are
//! ignored; a missing required name fails the bind and surfaces as an
//! init issue.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::errors::ConfigError;

/// One `{name, value}` option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    /// Dotted option name
    pub name: String,
    /// Option value
    pub value: Value,
}

/// Unordered collection of stage options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageConfig {
    options: Vec<ConfigOption>,
}

impl StageConfig {
    /// Create from a list of options
    pub fn new(options: Vec<ConfigOption>) -> Self {
        Self { options }
    }

    /// Builder-style option append
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set or replace an option
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.options.iter_mut().find(|o| o.name == name) {
            Some(option) => option.value = value,
            None => self.options.push(ConfigOption { name, value }),
        }
    }

    /// Raw value of an option
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.options.iter().rev().find(|o| o.name == name).map(|o| &o.value)
    }

    /// All options
    pub fn options(&self) -> &[ConfigOption] {
        &self.options
    }

    /// Bind the options under `prefix` into a typed settings struct
    pub fn bind<T: DeserializeOwned>(&self, prefix: &str) -> Result<T, ConfigError> {
        let tree = self.tree(prefix);
        serde_json::from_value(tree).map_err(|e| ConfigError::Invalid {
            prefix: prefix.to_string(),
            message: e.to_string(),
        })
    }

    /// Nested JSON object of the options under `prefix`
    pub fn tree(&self, prefix: &str) -> Value {
        let mut root = Map::new();
        let dotted = format!("{}.", prefix);
        for option in &self.options {
            let Some(rest) = option.name.strip_prefix(&dotted) else {
                continue;
            };
            insert_dotted(&mut root, rest, normalize_numbers(option.value.clone()));
        }
        Value::Object(root)
    }
}

impl FromIterator<(String, Value)> for StageConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut config = StageConfig::default();
        for (name, value) in iter {
            config.set(name, value);
        }
        config
    }
}

fn insert_dotted(root: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_dotted(map, tail, value);
            }
        }
    }
}

/// Down-cast integral floats so integer fields deserialise
fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::Number(Number::from(f as i64))
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Header entry as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Header name
    pub key: String,
    /// Header value, may hold an expression
    pub value: String,
}

/// Headers given either as `[{key, value}]` or as a plain map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderList {
    /// List form
    List(Vec<KeyValue>),
    /// Map form
    Map(indexmap::IndexMap<String, String>),
}

impl Default for HeaderList {
    fn default() -> Self {
        HeaderList::List(Vec::new())
    }
}

impl HeaderList {
    /// Header pairs in configuration order
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            HeaderList::List(items) => items
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect(),
            HeaderList::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Whether no headers are configured
    pub fn is_empty(&self) -> bool {
        match self {
            HeaderList::List(items) => items.is_empty(),
            HeaderList::Map(map) => map.is_empty(),
        }
    }
}
