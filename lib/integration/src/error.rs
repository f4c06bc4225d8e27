//! Error types for the integration crate.
//!
//! - `RegistryError`: a bot or rule could not be resolved
//! - `ParamError` / `ValidationError`: node parameters do not match a rule's specs
//! - `IngredientError`: a required ingredient could not be extracted
//! - `RuleError`: what a trigger or action implementation reports

use std::collections::BTreeMap;
use std::fmt;

/// Errors from rule lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No integration is registered under the given name.
    BotNotFound { bot: String },
    /// The integration exists but declares no trigger with this ID.
    TriggerNotFound { bot: String, rule_id: String },
    /// The integration exists but declares no action with this ID.
    ActionNotFound { bot: String, rule_id: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BotNotFound { bot } => write!(f, "bot not found: {bot}"),
            Self::TriggerNotFound { bot, rule_id } => {
                write!(f, "trigger rule not found: {bot}/{rule_id}")
            }
            Self::ActionNotFound { bot, rule_id } => {
                write!(f, "action rule not found: {bot}/{rule_id}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Per-field parameter problems, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// Field name to human-readable problem.
    pub fields: BTreeMap<String, String>,
}

impl ValidationError {
    /// Returns the problem recorded for a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return write!(f, "validation failed");
        }
        write!(f, "validation failed: ")?;
        for (i, (name, problem)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} {problem}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors from parameter validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// One or more parameters are invalid.
    Validation(ValidationError),
    /// A spec declares a pattern that is not a valid regular expression.
    InvalidPattern { name: String, reason: String },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::InvalidPattern { name, reason } => {
                write!(f, "invalid pattern for '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for ParamError {}

impl From<ValidationError> for ParamError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

/// Errors from ingredient extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngredientError {
    /// A required ingredient declares no path.
    PathRequired { name: String },
    /// A required ingredient's path resolved to nothing.
    NotFound { name: String, path: String },
}

impl fmt::Display for IngredientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathRequired { name } => write!(f, "ingredient '{name}' path is required"),
            Self::NotFound { name, path } => {
                write!(f, "ingredient '{name}' not found at path '{path}'")
            }
        }
    }
}

impl std::error::Error for IngredientError {}

/// Errors reported by trigger and action implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Parameters failed validation.
    Params(ParamError),
    /// An ingredient could not be extracted from the payload.
    Ingredient(IngredientError),
    /// The rule does not implement the requested operation.
    Unsupported { operation: String },
    /// The rule ran and failed.
    Failed { reason: String },
}

impl RuleError {
    /// Creates a generic failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns the structured validation error, if this is one.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Params(ParamError::Validation(e)) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Params(e) => write!(f, "{e}"),
            Self::Ingredient(e) => write!(f, "{e}"),
            Self::Unsupported { operation } => write!(f, "operation not supported: {operation}"),
            Self::Failed { reason } => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for RuleError {}

impl From<ParamError> for RuleError {
    fn from(e: ParamError) -> Self {
        Self::Params(e)
    }
}

impl From<ValidationError> for RuleError {
    fn from(e: ValidationError) -> Self {
        Self::Params(ParamError::Validation(e))
    }
}

impl From<IngredientError> for RuleError {
    fn from(e: IngredientError) -> Self {
        Self::Ingredient(e)
    }
}
