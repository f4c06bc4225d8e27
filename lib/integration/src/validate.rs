//! Validation of action parameters against declared inputs.
//!
//! Actions declare their inputs as a list of [`ParamSpec`]s. Actions without
//! a custom validator have their rendered parameters checked against these
//! specs before `run` is called.

use crate::error::{ParamError, ValidationError};
use flowbot_core::Kv;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// No type constraint.
    #[default]
    #[serde(other)]
    Any,
}

/// An input parameter declared by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name (key in the node's parameters).
    pub name: String,
    /// Expected JSON type.
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    /// Whether the parameter must be present and non-null.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Human-readable description for editors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Allowed values for string parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#enum: Vec<String>,
    /// Regular expression string parameters must match.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
}

impl ParamSpec {
    /// Creates an optional parameter spec.
    #[must_use]
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: String::new(),
            r#enum: Vec::new(),
            pattern: String::new(),
        }
    }

    /// Marks the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restricts a string parameter to a fixed set of values.
    #[must_use]
    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.r#enum = values.into_iter().map(Into::into).collect();
        self
    }

    /// Requires a string parameter to match a regular expression.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }
}

/// Validates parameters against a set of specs.
///
/// Every field problem is collected before returning, so the caller sees all
/// of them at once.
///
/// # Errors
///
/// Returns [`ParamError::Validation`] when any field is invalid, or
/// [`ParamError::InvalidPattern`] when a spec's pattern does not compile.
pub fn validate_params(params: &Kv, specs: &[ParamSpec]) -> Result<(), ParamError> {
    let mut fields = BTreeMap::new();

    for spec in specs.iter().filter(|s| !s.name.is_empty()) {
        let value = match params.get(&spec.name) {
            Some(JsonValue::Null) | None => {
                if spec.required {
                    fields.insert(spec.name.clone(), "is required".to_string());
                }
                continue;
            }
            Some(value) => value,
        };

        if let Some(problem) = check_value(spec, value)? {
            fields.insert(spec.name.clone(), problem);
        }
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { fields }.into())
    }
}

fn check_value(spec: &ParamSpec, value: &JsonValue) -> Result<Option<String>, ParamError> {
    let problem = match spec.param_type {
        ParamType::String => {
            let Some(s) = value.as_str() else {
                return Ok(Some("must be a string".to_string()));
            };
            if !spec.r#enum.is_empty() && !spec.r#enum.iter().any(|allowed| allowed == s) {
                return Ok(Some(format!("must be one of {:?}", spec.r#enum)));
            }
            if !spec.pattern.is_empty() {
                let re = Regex::new(&spec.pattern).map_err(|e| ParamError::InvalidPattern {
                    name: spec.name.clone(),
                    reason: e.to_string(),
                })?;
                if !re.is_match(s) {
                    return Ok(Some("does not match pattern".to_string()));
                }
            }
            None
        }
        ParamType::Number => (!value.is_number()).then(|| "must be a number".to_string()),
        ParamType::Bool => (!value.is_boolean()).then(|| "must be a boolean".to_string()),
        ParamType::Object => (!value.is_object()).then(|| "must be an object".to_string()),
        ParamType::Array => (!value.is_array()).then(|| "must be an array".to_string()),
        ParamType::Any => None,
    };
    Ok(problem)
}
