//! Dot-path access into oracle data.
//!
//! `None` means the field is absent. A present `null` comes back as
//! `Some(&Value::Null)`, so callers can tell "missing" from "falsy".

use serde_json::{Map, Value};

pub fn extract_field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }

    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn has_field(data: &Value, path: &str) -> bool {
    extract_field(data, path).is_some()
}

/// Numeric view of a value: JSON numbers and numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Builds an object from `output field -> source path` pairs. Paths that do
/// not resolve are left out.
pub fn project<'a>(
    data: &Value,
    mapping: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Value {
    let mut out = Map::new();
    for (field, source_path) in mapping {
        if let Some(value) = extract_field(data, source_path) {
            out.insert(field.clone(), value.clone());
        }
    }
    Value::Object(out)
}

/// JSON number from an f64, kept integral when it has no fractional part.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
