//! The JSON key-value map used for parameters, payloads and variables.

use serde_json::{Map, Value};

/// A JSON object: parameters, event payloads, node results and the
/// variable bag of an execution are all carried in this shape.
pub type Kv = Map<String, Value>;

/// Typed accessors over a [`Kv`] that tolerate the loose typing of
/// user-supplied JSON (numbers stored as strings, integers stored as floats).
pub trait KvExt {
    /// Returns the value at `key` if it is a string.
    fn get_str(&self, key: &str) -> Option<&str>;

    /// Returns the value at `key` as an integer.
    ///
    /// Floats are truncated and numeric strings are parsed.
    fn get_i64(&self, key: &str) -> Option<i64>;

    /// Returns the value at `key` as an object.
    fn get_object(&self, key: &str) -> Option<&Kv>;
}

impl KvExt for Kv {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        }
    }

    fn get_object(&self, key: &str) -> Option<&Kv> {
        self.get(key).and_then(Value::as_object)
    }
}

/// Formats a value the way it is substituted into text.
///
/// Strings are used verbatim; every other value uses its JSON text, so the
/// integer `1` and the float `1.0` format differently.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
