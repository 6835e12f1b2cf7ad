//! Value encoding
//!
//! Values are written as JSON text and read back as JSON when the text
//! parses, otherwise as the raw string.

use serde_json::Value;

/// Decodes stored text, falling back to the raw text as a JSON string.
pub fn decode_text(raw: String) -> Value {
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw),
    }
}

/// Truthiness used to decide whether a memoized result is worth caching.
///
/// `null`, `false`, `0` and `""` are falsy; everything else, including empty
/// arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
