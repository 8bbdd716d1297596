//! Narrow, explicit extraction from the untyped `extensions` mapping.
//!
//! Event extensions are arbitrary JSON scalars; callers pull out exactly the
//! keys they correlate on instead of typing the whole mapping.

use std::collections::BTreeMap;

use serde_json::Value;

/// Returns the trimmed string value of an extension, or `""` when absent or
/// not a string.
pub fn string_value(extensions: &BTreeMap<String, Value>, key: &str) -> String {
    match extensions.get(key) {
        Some(Value::String(v)) => v.trim().to_owned(),
        _ => String::new(),
    }
}

/// Returns the boolean value of an extension, accepting the usual JSON and
/// stringly spellings (`true`, `"true"`, `"1"`, `"yes"`, non-zero numbers).
pub fn bool_value(extensions: &BTreeMap<String, Value>, key: &str) -> bool {
    match extensions.get(key) {
        Some(Value::Bool(v)) => *v,
        Some(Value::String(v)) => {
            let v = v.trim().to_ascii_lowercase();
            v == "true" || v == "1" || v == "yes"
        }
        Some(Value::Number(v)) => v.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Returns the first non-empty string value among `keys`, in order.
pub fn first_string(extensions: &BTreeMap<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        let value = string_value(extensions, key);
        if !value.is_empty() {
            return value;
        }
    }
    String::new()
}
