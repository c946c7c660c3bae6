//! Expression Evaluation for Stage Settings
//!
//! ## Overview
//!
//! Several settings may interpolate values per record, for example an HTTP
//! processor URL of
//!
//! ```text
//! ${url + "?a=" + record:value('/a')}
//! ```
//!
//! Settings are templates: literal text mixed with `${ ... }` expressions.
//! A template made of exactly one expression keeps the expression's type
//! (so `${record:value('/count')}` yields an integer); any other template
//! renders to text.
//!
//! ## Variable Bag
//!
//! Evaluation never mutates anything. The record being processed and any
//! per-call variables travel in an [`ElVars`] bag; pipeline parameters are
//! passed alongside as constants and are looked up after the bag.
//!
//! ```rust
//! use edgeflow_core::el::{self, Constants, ElVars};
//! use edgeflow_core::record::{Field, Record};
//!
//! let record = Record::new("r1", Field::from(serde_json::json!({"a": 2})));
//! let vars = ElVars::new().with_record(record);
//! let mut constants = Constants::new();
//! constants.insert("base".into(), Field::from("http://host"));
//!
//! let url = el::evaluate("${base}/items/${record:value('/a')}", &vars, &constants).unwrap();
//! assert_eq!(url, Field::from("http://host/items/2"));
//! ```

mod functions;
pub mod parser;

use indexmap::IndexMap;

use crate::errors::ElError;
use crate::record::{Field, Record};
use parser::{Expr, Segment};

/// Pipeline parameters visible to every expression
pub type Constants = IndexMap<String, Field>;

/// Per-evaluation variable bag
#[derive(Debug, Clone, Default)]
pub struct ElVars {
    record: Option<Record>,
    variables: IndexMap<String, Field>,
}

impl ElVars {
    /// Empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a record for `record:` functions
    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    /// Bind a named variable
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Bound record, if any
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// Look up a variable
    pub fn variable(&self, name: &str) -> Option<&Field> {
        self.variables.get(name)
    }
}

/// Whether a setting contains at least one `${}` expression
pub fn is_expression(text: &str) -> bool {
    text.contains("${")
}

/// Evaluate a template against the bag and constants
pub fn evaluate(template: &str, vars: &ElVars, constants: &Constants) -> Result<Field, ElError> {
    let segments = parser::parse_template(template)?;
    match segments.as_slice() {
        [] => Ok(Field::Text(String::new())),
        [Segment::Expr(expr)] => eval(expr, vars, constants),
        _ => {
            let mut out = String::new();
            for segment in &segments {
                match segment {
                    Segment::Text(text) => out.push_str(text),
                    Segment::Expr(expr) => out.push_str(&eval(expr, vars, constants)?.to_text()),
                }
            }
            Ok(Field::Text(out))
        }
    }
}

fn eval(expr: &Expr, vars: &ElVars, constants: &Constants) -> Result<Field, ElError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => vars
            .variable(name)
            .or_else(|| constants.get(name))
            .cloned()
            .ok_or_else(|| ElError::UnknownVariable(name.clone())),
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, vars, constants))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, args, vars)
        }
        Expr::Negate(inner) => match eval(inner, vars, constants)? {
            Field::Integer(i) => Ok(Field::Integer(-i)),
            Field::Float(f) => Ok(Field::Float(-f)),
            other => Err(ElError::TypeMismatch {
                operator: '-',
                left: "NUMBER",
                right: other.type_name(),
            }),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, vars, constants)?;
            let rhs = eval(rhs, vars, constants)?;
            binary(*op, lhs, rhs)
        }
    }
}

fn binary(op: char, lhs: Field, rhs: Field) -> Result<Field, ElError> {
    let mismatch = |lhs: &Field, rhs: &Field| ElError::TypeMismatch {
        operator: op,
        left: lhs.type_name(),
        right: rhs.type_name(),
    };
    if op == '+' && (matches!(lhs, Field::Text(_)) || matches!(rhs, Field::Text(_))) {
        return Ok(Field::Text(format!("{}{}", lhs.to_text(), rhs.to_text())));
    }
    match (&lhs, &rhs) {
        (Field::Integer(a), Field::Integer(b)) => {
            let result = match op {
                '+' => a.checked_add(*b),
                '-' => a.checked_sub(*b),
                '*' => a.checked_mul(*b),
                _ => None,
            };
            match result {
                Some(value) => Ok(Field::Integer(value)),
                None => float_op(op, *a as f64, *b as f64),
            }
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => float_op(op, a, b),
            _ => Err(mismatch(&lhs, &rhs)),
        },
    }
}

fn float_op(op: char, a: f64, b: f64) -> Result<Field, ElError> {
    Ok(Field::Float(match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        _ => a / b,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        let mut record = Record::new(
            "rec::0",
            Field::from(json!({"a": 2.55, "b": "Body Param", "method": "POST", "n": 4})),
        );
        record.set_attribute("topic", "sensors/1");
        record
    }

    fn constants() -> Constants {
        let mut constants = Constants::new();
        constants.insert("url".into(), Field::from("http://localhost:8080/echo"));
        constants
    }

    #[test]
    fn test_url_interpolation() {
        let vars = ElVars::new().with_record(record());
        let url = evaluate("${url+\"?a=\"+record:value('/a')}", &vars, &constants()).unwrap();
        assert_eq!(url, Field::from("http://localhost:8080/echo?a=2.55"));
    }

    #[test]
    fn test_single_expression_keeps_type() {
        let vars = ElVars::new().with_record(record());
        assert_eq!(evaluate("${record:value('/n')}", &vars, &constants()).unwrap(), Field::Integer(4));
        assert_eq!(evaluate("${record:value('/n') * 2}", &vars, &constants()).unwrap(), Field::Integer(8));
        assert_eq!(evaluate("${record:value('/n') / 8}", &vars, &constants()).unwrap(), Field::Float(0.5));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let vars = ElVars::new();
        assert_eq!(evaluate("GET", &vars, &constants()).unwrap(), Field::from("GET"));
        assert_eq!(evaluate("", &vars, &constants()).unwrap(), Field::from(""));
    }

    #[test]
    fn test_record_functions() {
        let vars = ElVars::new().with_record(record());
        let c = constants();
        assert_eq!(evaluate("${record:attribute('topic')}", &vars, &c).unwrap(), Field::from("sensors/1"));
        assert_eq!(evaluate("${record:id()}", &vars, &c).unwrap(), Field::from("rec::0"));
        assert_eq!(evaluate("${record:value('/missing')}", &vars, &c).unwrap(), Field::Null);
        assert_eq!(
            evaluate("${record:valueOrDefault('/missing', 'x')}", &vars, &c).unwrap(),
            Field::from("x")
        );
        assert_eq!(evaluate("${str:toLower(record:value('/method'))}", &vars, &c).unwrap(), Field::from("post"));
    }

    #[test]
    fn test_errors() {
        let c = constants();
        assert!(matches!(
            evaluate("${record:value('/a')}", &ElVars::new(), &c),
            Err(ElError::NoRecord(_))
        ));
        assert!(matches!(evaluate("${nope}", &ElVars::new(), &c), Err(ElError::UnknownVariable(_))));
        assert!(matches!(evaluate("${nope:fn()}", &ElVars::new(), &c), Err(ElError::UnknownFunction(_))));
        assert!(matches!(evaluate("${true * 2}", &ElVars::new(), &c), Err(ElError::TypeMismatch { .. })));
    }

    #[test]
    fn test_variables_shadow_constants() {
        let vars = ElVars::new().with_variable("url", "override");
        assert_eq!(evaluate("${url}", &vars, &constants()).unwrap(), Field::from("override"));
    }
}
