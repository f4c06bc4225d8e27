//! Trigger and action rule traits.
//!
//! Integrations ("bots") contribute capabilities to flows as rules. A
//! trigger rule turns an incoming event into variables (and, in poll mode,
//! fetches events itself); an action rule performs a side effect using the
//! current variables. The flow engine only ever sees rules through these
//! traits.

use crate::error::RuleError;
use crate::ingredient::{Ingredient, extract_ingredients};
use crate::validate::{ParamSpec, validate_params};
use async_trait::async_trait;
use flowbot_core::{FlowId, Kv};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time budget for a single rule invocation.
pub const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_secs(120);

/// How a trigger receives its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Events are pushed to a webhook endpoint.
    Webhook,
    /// The poller queries the trigger on a timer.
    Poll,
    /// Events are submitted explicitly by a user or another system.
    #[default]
    Manual,
}

/// The outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    /// New events; each one becomes a flow execution.
    #[serde(default)]
    pub events: Vec<Kv>,
    /// Cursor state to persist. `None` keeps the previous state.
    #[serde(default)]
    pub state: Option<Kv>,
}

/// Caller context handed to every rule invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContext {
    /// The flow the rule runs for.
    pub flow_id: FlowId,
    /// Owner of the flow.
    pub uid: String,
    /// Topic the flow belongs to.
    pub topic: String,
    /// Time budget for this invocation; the caller enforces it.
    pub timeout: Duration,
}

impl RuleContext {
    /// Creates a context with the default timeout.
    #[must_use]
    pub fn new(flow_id: FlowId, uid: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            flow_id,
            uid: uid.into(),
            topic: topic.into(),
            timeout: DEFAULT_RULE_TIMEOUT,
        }
    }

    /// Sets the time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A trigger capability contributed by an integration.
#[async_trait]
pub trait TriggerRule: Send + Sync {
    /// Rule ID, unique within its integration.
    fn id(&self) -> &str;

    /// Human-readable title.
    fn title(&self) -> &str {
        self.id()
    }

    /// Longer description for editors.
    fn description(&self) -> &str {
        ""
    }

    /// How events reach this trigger.
    fn mode(&self) -> TriggerMode {
        TriggerMode::Manual
    }

    /// Variables this trigger produces.
    fn ingredients(&self) -> &[Ingredient] {
        &[]
    }

    /// Checks the node's parameters before the trigger is used.
    fn config(&self, _params: &Kv) -> Result<(), RuleError> {
        Ok(())
    }

    /// Converts an incoming payload into variables.
    ///
    /// The default extracts the declared ingredients, or passes the payload
    /// through unchanged when none are declared.
    async fn extract(&self, _ctx: &RuleContext, _params: &Kv, payload: &Kv) -> Result<Kv, RuleError> {
        if self.ingredients().is_empty() {
            return Ok(payload.clone());
        }
        Ok(extract_ingredients(payload, None, self.ingredients())?)
    }

    /// Fetches new events given the persisted cursor state.
    ///
    /// Only called for triggers whose mode is [`TriggerMode::Poll`].
    async fn poll(&self, _ctx: &RuleContext, _params: &Kv, _state: &Kv) -> Result<PollResult, RuleError> {
        Err(RuleError::Unsupported {
            operation: "poll".to_string(),
        })
    }
}

/// An action capability contributed by an integration.
#[async_trait]
pub trait ActionRule: Send + Sync {
    /// Rule ID, unique within its integration.
    fn id(&self) -> &str;

    /// Human-readable title.
    fn title(&self) -> &str {
        self.id()
    }

    /// Longer description for editors.
    fn description(&self) -> &str {
        ""
    }

    /// Declared input parameters.
    fn inputs(&self) -> &[ParamSpec] {
        &[]
    }

    /// Checks rendered parameters before `run`.
    ///
    /// The default validates against [`inputs`](Self::inputs).
    fn validate(&self, params: &Kv) -> Result<(), RuleError> {
        validate_params(params, self.inputs()).map_err(RuleError::from)
    }

    /// Performs the action. The returned keys are merged into the variable bag.
    async fn run(&self, ctx: &RuleContext, params: &Kv, variables: &Kv) -> Result<Kv, RuleError>;
}

/// The kind of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// A trigger rule.
    Trigger,
    /// An action rule.
    Action,
}

/// Serializable description of a rule, for catalogs and editors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// Rule ID.
    pub id: String,
    /// Trigger or action.
    pub kind: RuleKind,
    /// Human-readable title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Trigger mode (triggers only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TriggerMode>,
    /// Variables a trigger produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingredients: Vec<Ingredient>,
    /// Parameters an action accepts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ParamSpec>,
}

impl RuleInfo {
    /// Describes a trigger rule.
    #[must_use]
    pub fn of_trigger(rule: &dyn TriggerRule) -> Self {
        Self {
            id: rule.id().to_string(),
            kind: RuleKind::Trigger,
            title: rule.title().to_string(),
            description: rule.description().to_string(),
            mode: Some(rule.mode()),
            ingredients: rule.ingredients().to_vec(),
            inputs: Vec::new(),
        }
    }

    /// Describes an action rule.
    #[must_use]
    pub fn of_action(rule: &dyn ActionRule) -> Self {
        Self {
            id: rule.id().to_string(),
            kind: RuleKind::Action,
            title: rule.title().to_string(),
            description: rule.description().to_string(),
            mode: None,
            ingredients: Vec::new(),
            inputs: rule.inputs().to_vec(),
        }
    }
}
