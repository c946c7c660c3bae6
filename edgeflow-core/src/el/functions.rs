//! Built-in expression functions

use chrono::Utc;

use super::ElVars;
use crate::errors::ElError;
use crate::record::{Field, Record};

fn invalid(function: &str, message: &str) -> ElError {
    ElError::InvalidArguments {
        function: function.to_string(),
        message: message.to_string(),
    }
}

fn arity(function: &str, args: &[Field], expected: usize) -> Result<(), ElError> {
    if args.len() != expected {
        return Err(invalid(
            function,
            &format!("expected {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}

fn text_arg<'a>(function: &str, args: &'a [Field], idx: usize) -> Result<&'a str, ElError> {
    args.get(idx)
        .and_then(Field::as_str)
        .ok_or_else(|| invalid(function, &format!("argument {} must be text", idx + 1)))
}

fn bound_record<'a>(function: &str, vars: &'a ElVars) -> Result<&'a Record, ElError> {
    vars.record().ok_or_else(|| ElError::NoRecord(function.to_string()))
}

/// Invoke a function by its namespaced name
pub fn call(name: &str, args: Vec<Field>, vars: &ElVars) -> Result<Field, ElError> {
    match name {
        "record:value" => {
            arity(name, &args, 1)?;
            let path = text_arg(name, &args, 0)?;
            Ok(bound_record(name, vars)?.get(path).cloned().unwrap_or(Field::Null))
        }
        "record:valueOrDefault" => {
            arity(name, &args, 2)?;
            let path = text_arg(name, &args, 0)?;
            match bound_record(name, vars)?.get(path) {
                Some(Field::Null) | None => Ok(args[1].clone()),
                Some(value) => Ok(value.clone()),
            }
        }
        "record:attribute" => {
            arity(name, &args, 1)?;
            let attribute = text_arg(name, &args, 0)?;
            Ok(bound_record(name, vars)?
                .attribute(attribute)
                .map(Field::from)
                .unwrap_or(Field::Null))
        }
        "record:id" => {
            arity(name, &args, 0)?;
            Ok(Field::from(bound_record(name, vars)?.header().source_id.as_str()))
        }
        "str:toUpper" => {
            arity(name, &args, 1)?;
            Ok(Field::Text(args[0].to_text().to_uppercase()))
        }
        "str:toLower" => {
            arity(name, &args, 1)?;
            Ok(Field::Text(args[0].to_text().to_lowercase()))
        }
        "str:trim" => {
            arity(name, &args, 1)?;
            Ok(Field::Text(args[0].to_text().trim().to_string()))
        }
        "str:concat" => Ok(Field::Text(args.iter().map(Field::to_text).collect())),
        "time:now" => {
            arity(name, &args, 0)?;
            Ok(Field::Timestamp(Utc::now()))
        }
        "math:abs" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Field::Integer(i) => Ok(Field::Integer(i.saturating_abs())),
                Field::Float(f) => Ok(Field::Float(f.abs())),
                _ => Err(invalid(name, "argument must be numeric")),
            }
        }
        _ => Err(ElError::UnknownFunction(name.to_string())),
    }
}
