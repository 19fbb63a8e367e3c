//! # Canonical JSON
//!
//! The sole pre-hash format for identity and chaining: object keys sorted
//! lexicographically at every depth, arrays in order, no insignificant
//! whitespace. Numbers are emitted in serde_json's shortest round-trip form;
//! every hashed document in this crate is synthesized through this writer,
//! which pins the `sorted-json-v1` canonicalization label to a single byte
//! representation.

use serde::Serialize;
use serde_json::Value;

/// Canonicalize any serializable value.
///
/// # Errors
///
/// Fails when the value cannot be represented as JSON (e.g. a map with
/// non-string keys or a non-finite float).
pub fn canonicalize<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(to_canonical_string(&json))
}

/// Canonicalize a JSON value to its `sorted-json-v1` byte form.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json handles the JSON escaping rules
    out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()));
}
