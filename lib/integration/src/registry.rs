//! Rule lookup by bot name and rule ID.

use crate::error::RegistryError;
use crate::rule::{ActionRule, RuleInfo, TriggerRule};
use std::collections::HashMap;
use std::sync::Arc;

/// Bot name that resolves through the development integration.
pub const SYSTEM_BOT: &str = "system";

/// Name of the development integration.
pub const DEV_BOT: &str = "dev";

/// Resolves trigger and action rules.
///
/// The engine and poller depend on this trait only, so tests can supply
/// their own rules without registering a full integration.
pub trait RuleRegistry: Send + Sync {
    /// Finds a trigger rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the bot or rule is unknown.
    fn find_trigger(&self, bot: &str, rule_id: &str) -> Result<Arc<dyn TriggerRule>, RegistryError>;

    /// Finds an action rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the bot or rule is unknown.
    fn find_action(&self, bot: &str, rule_id: &str) -> Result<Arc<dyn ActionRule>, RegistryError>;
}

/// A named bundle of trigger and action rules.
#[derive(Clone, Default)]
pub struct Integration {
    name: String,
    triggers: Vec<Arc<dyn TriggerRule>>,
    actions: Vec<Arc<dyn ActionRule>>,
}

impl Integration {
    /// Creates an empty integration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Adds a trigger rule.
    #[must_use]
    pub fn with_trigger(mut self, rule: impl TriggerRule + 'static) -> Self {
        self.triggers.push(Arc::new(rule));
        self
    }

    /// Adds an action rule.
    #[must_use]
    pub fn with_action(mut self, rule: impl ActionRule + 'static) -> Self {
        self.actions.push(Arc::new(rule));
        self
    }

    /// The integration's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Describes every rule, triggers first.
    #[must_use]
    pub fn describe(&self) -> Vec<RuleInfo> {
        self.triggers
            .iter()
            .map(|t| RuleInfo::of_trigger(t.as_ref()))
            .chain(self.actions.iter().map(|a| RuleInfo::of_action(a.as_ref())))
            .collect()
    }

    fn trigger(&self, rule_id: &str) -> Option<Arc<dyn TriggerRule>> {
        self.triggers.iter().find(|t| t.id() == rule_id).cloned()
    }

    fn action(&self, rule_id: &str) -> Option<Arc<dyn ActionRule>> {
        self.actions.iter().find(|a| a.id() == rule_id).cloned()
    }
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.name)
            .field("triggers", &self.triggers.iter().map(|t| t.id()).collect::<Vec<_>>())
            .field("actions", &self.actions.iter().map(|a| a.id()).collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of integrations keyed by name.
#[derive(Debug, Clone, Default)]
pub struct IntegrationRegistry {
    integrations: HashMap<String, Integration>,
}

impl IntegrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an integration, replacing any with the same name.
    pub fn register(&mut self, integration: Integration) {
        self.integrations
            .insert(integration.name().to_string(), integration);
    }

    /// Returns the registered integration names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.integrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns an integration by name.
    ///
    /// `system` falls back to `dev` unless an integration is registered
    /// under `system` itself.
    #[must_use]
    pub fn get(&self, bot: &str) -> Option<&Integration> {
        self.integrations.get(bot).or_else(|| {
            (bot == SYSTEM_BOT)
                .then(|| self.integrations.get(DEV_BOT))
                .flatten()
        })
    }

    fn resolve(&self, bot: &str) -> Result<&Integration, RegistryError> {
        self.get(bot).ok_or_else(|| RegistryError::BotNotFound {
            bot: bot.to_string(),
        })
    }
}

impl RuleRegistry for IntegrationRegistry {
    fn find_trigger(&self, bot: &str, rule_id: &str) -> Result<Arc<dyn TriggerRule>, RegistryError> {
        self.resolve(bot)?
            .trigger(rule_id)
            .ok_or_else(|| RegistryError::TriggerNotFound {
                bot: bot.to_string(),
                rule_id: rule_id.to_string(),
            })
    }

    fn find_action(&self, bot: &str, rule_id: &str) -> Result<Arc<dyn ActionRule>, RegistryError> {
        self.resolve(bot)?
            .action(rule_id)
            .ok_or_else(|| RegistryError::ActionNotFound {
                bot: bot.to_string(),
                rule_id: rule_id.to_string(),
            })
    }
}
