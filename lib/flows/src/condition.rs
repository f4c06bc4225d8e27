//! Gate evaluation for filter and condition nodes.

use crate::model::Condition;
use flowbot_core::{Kv, display_value};
use serde_json::Value as JsonValue;

/// Evaluates AND-combined conditions against the variable bag.
///
/// An empty list passes. A condition whose variable is missing fails.
#[must_use]
pub fn evaluate_conditions(conditions: &[Condition], variables: &Kv) -> bool {
    conditions.iter().all(|c| {
        variables
            .get(&c.variable)
            .is_some_and(|value| evaluate(value, &c.operator, &c.value))
    })
}

/// Applies one operator. Unknown operators evaluate to false.
///
/// Equality compares display text, so `1` and `"1"` are equal while `1` and
/// `1.0` are not. Ordering operators compare both sides as numbers.
#[must_use]
pub fn evaluate(value: &JsonValue, operator: &str, expected: &JsonValue) -> bool {
    match operator {
        "eq" | "==" => display_value(value) == display_value(expected),
        "ne" | "!=" => display_value(value) != display_value(expected),
        "gt" | ">" => as_number(value) > as_number(expected),
        "gte" | ">=" => as_number(value) >= as_number(expected),
        "lt" | "<" => as_number(value) < as_number(expected),
        "lte" | "<=" => as_number(value) <= as_number(expected),
        "contains" => {
            let haystack = display_value(value);
            let needle = display_value(expected);
            !haystack.is_empty() && !needle.is_empty() && haystack.contains(&needle)
        }
        _ => false,
    }
}

/// Numbers as-is, numeric strings parsed, everything else zero.
fn as_number(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
