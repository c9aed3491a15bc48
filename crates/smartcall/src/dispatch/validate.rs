//! Schema-driven parameter validation and coercion.
//!
//! Models send arguments loosely typed (`"3"` for an integer, `"yes"` for a
//! boolean). [`validate`] checks required parameters and coerces each
//! supplied value to its declared [`ParamType`], returning a clean argument
//! map. It is stateless and idempotent: validating its own output yields the
//! same map.

use super::callable::Arguments;
use super::schema::{CallSchema, ParamType};
use crate::error::ValidationError;
use serde_json::{Number, Value};

/// Longest rendering of an offending value kept in error messages.
const MAX_FOUND_CHARS: usize = 60;

/// Validate and coerce raw arguments against a schema.
///
/// - A missing required parameter fails.
/// - Supplied values are coerced to their parameter's type tag; a value that
///   cannot be coerced fails.
/// - An explicit `null` for an optional parameter is treated as absent.
/// - Keys not declared in the schema are dropped.
pub fn validate(schema: &CallSchema, raw: &Arguments) -> Result<Arguments, ValidationError> {
    if let Some(missing) = schema
        .required_parameters
        .iter()
        .find(|name| !raw.contains_key(name.as_str()))
    {
        return Err(ValidationError::MissingParameter(missing.clone()));
    }

    let mut validated = Arguments::new();
    for param in &schema.parameters {
        match raw.get(&param.name) {
            None => {}
            Some(Value::Null) if !schema.is_required(&param.name) => {}
            Some(value) => {
                let coerced = coerce(&param.name, param.param_type, value)?;
                validated.insert(param.name.clone(), coerced);
            }
        }
    }
    Ok(validated)
}

/// Coerce a single value to a type tag.
pub fn coerce(name: &str, ty: ParamType, value: &Value) -> Result<Value, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        name: name.to_string(),
        expected: ty,
        found: describe(value),
    };

    match ty {
        ParamType::String => coerce_string(value).ok_or_else(mismatch),
        ParamType::Integer => coerce_integer(value).ok_or_else(mismatch),
        ParamType::Number => coerce_number(value).ok_or_else(mismatch),
        ParamType::Boolean => coerce_boolean(value).map(Value::Bool).ok_or_else(mismatch),
        ParamType::StringArray | ParamType::IntegerArray => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let element = if ty == ParamType::StringArray {
                ParamType::String
            } else {
                ParamType::Integer
            };
            items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce(&format!("{name}[{i}]"), element, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        ParamType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
    }
}

fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            if !f.is_finite() || f.fract() != 0.0 {
                return None;
            }
            // Same ranges as JSON integers: i64, then the rest of u64.
            let number = if (-TWO_POW_63..TWO_POW_63).contains(&f) {
                Number::from(f as i64)
            } else if (0.0..TWO_POW_64).contains(&f) {
                Number::from(f as u64)
            } else {
                return None;
            };
            Some(Value::Number(number))
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Number::from)
                .or_else(|_| s.parse::<u64>().map(Number::from))
                .ok()
                .map(Value::Number)
        }
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !f.is_finite() {
        return None;
    }
    Number::from_f64(f).map(Value::Number)
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Short rendering of an offending value for error messages.
fn describe(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > MAX_FOUND_CHARS {
        let head: String = rendered.chars().take(MAX_FOUND_CHARS).collect();
        format!("{head}...")
    } else {
        rendered
    }
}
