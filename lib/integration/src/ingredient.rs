//! Ingredient extraction from event payloads.
//!
//! An ingredient names a variable and where to find it in an incoming
//! event. Paths are dotted and evaluated against a root object with two
//! keys: `payload` (the full event) and `item` (an optional per-item object,
//! used by pollers that fan a result out into several events). Numeric
//! segments index into arrays, so `payload.items.0.id` reads the first
//! item's `id`.

use crate::error::IngredientError;
use flowbot_core::Kv;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Declares how to extract one variable from an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Variable name the value is stored under.
    pub name: String,
    /// Dotted path, e.g. `payload.data.id` or `item.status`.
    pub path: String,
    /// Whether a missing value is an error.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Human-readable description for editors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Ingredient {
    /// Creates an optional ingredient.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            required: false,
            description: String::new(),
        }
    }

    /// Marks the ingredient as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Extracts ingredient values from a payload.
///
/// Ingredients without a name are ignored. Optional ingredients whose path
/// is empty or resolves to nothing are skipped.
///
/// # Errors
///
/// Returns an error when a required ingredient has no path or its path
/// resolves to nothing.
pub fn extract_ingredients(
    payload: &Kv,
    item: Option<&JsonValue>,
    ingredients: &[Ingredient],
) -> Result<Kv, IngredientError> {
    let mut out = Kv::new();
    if ingredients.is_empty() {
        return Ok(out);
    }

    let mut root = Kv::new();
    root.insert("payload".to_string(), JsonValue::Object(payload.clone()));
    if let Some(item) = item {
        root.insert("item".to_string(), item.clone());
    }
    let root = JsonValue::Object(root);

    for ing in ingredients.iter().filter(|i| !i.name.is_empty()) {
        if ing.path.is_empty() {
            if ing.required {
                return Err(IngredientError::PathRequired {
                    name: ing.name.clone(),
                });
            }
            continue;
        }

        match lookup_path(&root, &ing.path) {
            Some(value) => {
                out.insert(ing.name.clone(), value.clone());
            }
            None if ing.required => {
                return Err(IngredientError::NotFound {
                    name: ing.name.clone(),
                    path: ing.path.clone(),
                });
            }
            None => {}
        }
    }

    Ok(out)
}

/// Resolves a dotted path inside a JSON value.
#[must_use]
pub fn lookup_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(root, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Kv {
        json!({
            "data": {"id": 42, "tags": ["a", "b"]},
            "status": "open"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn extracts_nested_and_indexed_paths() {
        let ingredients = [
            Ingredient::new("id", "payload.data.id"),
            Ingredient::new("second_tag", "payload.data.tags.1"),
            Ingredient::new("status", "payload.status"),
        ];
        let out = extract_ingredients(&payload(), None, &ingredients).unwrap();
        assert_eq!(out["id"], json!(42));
        assert_eq!(out["second_tag"], json!("b"));
        assert_eq!(out["status"], json!("open"));
    }

    #[test]
    fn item_root_is_available() {
        let item = json!({"title": "hello"});
        let ingredients = [Ingredient::new("title", "item.title")];
        let out = extract_ingredients(&payload(), Some(&item), &ingredients).unwrap();
        assert_eq!(out["title"], json!("hello"));
    }

    #[test]
    fn optional_missing_values_are_skipped() {
        let ingredients = [
            Ingredient::new("missing", "payload.nope"),
            Ingredient::new("", "payload.status"),
            Ingredient::new("no_path", ""),
        ];
        let out = extract_ingredients(&payload(), None, &ingredients).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn required_missing_value_is_an_error() {
        let ingredients = [Ingredient::new("owner", "payload.data.owner").required()];
        let err = extract_ingredients(&payload(), None, &ingredients).unwrap_err();
        assert_eq!(
            err,
            IngredientError::NotFound {
                name: "owner".to_string(),
                path: "payload.data.owner".to_string(),
            }
        );
    }

    #[test]
    fn required_without_path_is_an_error() {
        let ingredients = [Ingredient::new("owner", "").required()];
        let err = extract_ingredients(&payload(), None, &ingredients).unwrap_err();
        assert!(matches!(err, IngredientError::PathRequired { .. }));
    }
}
