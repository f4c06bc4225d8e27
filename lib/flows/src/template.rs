//! Parameter templating.
//!
//! Node parameters may contain `{{name}}` placeholders that are filled from
//! the execution's variable bag before the node runs.

use flowbot_core::{Kv, display_value};
use serde_json::Value as JsonValue;

/// Renders placeholders in a string.
pub trait TemplateRenderer: Send + Sync {
    /// Renders `template` against `variables`.
    fn render(&self, template: &str, variables: &Kv) -> String;
}

/// Replaces literal `{{key}}` for every top-level variable.
///
/// Strings are substituted verbatim; other values use their JSON text.
/// Placeholders naming unknown variables are left as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTemplateRenderer;

impl TemplateRenderer for SimpleTemplateRenderer {
    fn render(&self, template: &str, variables: &Kv) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }
        variables
            .iter()
            .fold(template.to_string(), |out, (key, value)| {
                let placeholder = format!("{{{{{key}}}}}");
                if out.contains(&placeholder) {
                    out.replace(&placeholder, &display_value(value))
                } else {
                    out
                }
            })
    }
}

/// Renders every string inside a value, walking objects and arrays.
#[must_use]
pub fn render_value(renderer: &dyn TemplateRenderer, value: &JsonValue, variables: &Kv) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(renderer.render(s, variables)),
        JsonValue::Object(map) => JsonValue::Object(render_params(renderer, map, variables)),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| render_value(renderer, item, variables))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Renders every value of a parameter map.
#[must_use]
pub fn render_params(renderer: &dyn TemplateRenderer, params: &Kv, variables: &Kv) -> Kv {
    params
        .iter()
        .map(|(k, v)| (k.clone(), render_value(renderer, v, variables)))
        .collect()
}
