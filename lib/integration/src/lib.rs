//! Integration framework for flowbot.
//!
//! This crate provides:
//!
//! - **Rules**: the trigger and action traits integrations implement
//! - **Registry**: lookup of rules by bot name and rule ID
//! - **Validation**: checking action parameters against declared inputs
//! - **Ingredients**: path-based extraction of variables from event payloads

pub mod error;
pub mod ingredient;
pub mod registry;
pub mod rule;
pub mod validate;

pub use error::{IngredientError, ParamError, RegistryError, RuleError, ValidationError};
pub use ingredient::{Ingredient, extract_ingredients, lookup_path};
pub use registry::{DEV_BOT, Integration, IntegrationRegistry, RuleRegistry, SYSTEM_BOT};
pub use rule::{
    ActionRule, DEFAULT_RULE_TIMEOUT, PollResult, RuleContext, RuleInfo, RuleKind, TriggerMode,
    TriggerRule,
};
pub use validate::{ParamSpec, ParamType, validate_params};
