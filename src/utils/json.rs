//! Accessors over loosely typed descriptor and record documents.

use serde_json::Value;

/// Value at a dotted path; numeric segments index arrays
pub fn deep_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn deep_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    deep_get(value, path).and_then(Value::as_str)
}

/// Array at a dotted path, empty when absent or not an array
pub fn deep_array<'a>(value: &'a Value, path: &str) -> &'a [Value] {
    deep_get(value, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn str_of<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Scalar rendered as text: strings verbatim, numbers and booleans printed
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First `max` characters of a string
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
