//! Built-in `dev` integration.
//!
//! Gives a fresh daemon something to run: a manual trigger, a webhook
//! trigger, a poll trigger that counts upwards, and two actions. Bare
//! trigger types (no `bot|` prefix) resolve here.

use async_trait::async_trait;
use flowbot_core::{Kv, KvExt};
use flowbot_integration::{
    ActionRule, DEV_BOT, Ingredient, Integration, IntegrationRegistry, ParamSpec, ParamType,
    PollResult, RuleContext, RuleError, TriggerMode, TriggerRule, validate_params,
};
use serde_json::json;
use tracing::info;

/// Manually submitted event; the payload becomes the variables.
struct Ping;

#[async_trait]
impl TriggerRule for Ping {
    fn id(&self) -> &str {
        "ping"
    }

    fn title(&self) -> &str {
        "Ping"
    }

    fn description(&self) -> &str {
        "Fires when an event is submitted by hand"
    }
}

/// Webhook call; requires a `token` parameter.
struct Webhook {
    params: Vec<ParamSpec>,
    ingredients: Vec<Ingredient>,
}

impl Webhook {
    fn new() -> Self {
        Self {
            params: vec![
                ParamSpec::new("token", ParamType::String)
                    .required()
                    .with_description("Secret path segment of the webhook URL"),
            ],
            ingredients: vec![
                Ingredient::new("body", "payload.body"),
                Ingredient::new("sender", "payload.headers.x-sender"),
            ],
        }
    }
}

#[async_trait]
impl TriggerRule for Webhook {
    fn id(&self) -> &str {
        "webhook"
    }

    fn title(&self) -> &str {
        "Webhook"
    }

    fn mode(&self) -> TriggerMode {
        TriggerMode::Webhook
    }

    fn ingredients(&self) -> &[Ingredient] {
        &self.ingredients
    }

    fn config(&self, params: &Kv) -> Result<(), RuleError> {
        Ok(validate_params(params, &self.params)?)
    }
}

/// Poll trigger emitting one event per poll with an increasing `count`.
struct Counter;

#[async_trait]
impl TriggerRule for Counter {
    fn id(&self) -> &str {
        "counter"
    }

    fn title(&self) -> &str {
        "Counter"
    }

    fn mode(&self) -> TriggerMode {
        TriggerMode::Poll
    }

    async fn poll(&self, _ctx: &RuleContext, _params: &Kv, state: &Kv) -> Result<PollResult, RuleError> {
        let count = state.get_i64("count").unwrap_or(0) + 1;
        let mut event = Kv::new();
        event.insert("id".to_string(), json!(count));
        event.insert("count".to_string(), json!(count));

        let mut next = state.clone();
        next.insert("count".to_string(), json!(count));
        Ok(PollResult {
            events: vec![event],
            state: Some(next),
        })
    }
}

/// Returns its rendered parameters as output variables.
struct Echo;

#[async_trait]
impl ActionRule for Echo {
    fn id(&self) -> &str {
        "echo"
    }

    fn title(&self) -> &str {
        "Echo"
    }

    async fn run(&self, _ctx: &RuleContext, params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
        Ok(params.clone())
    }
}

/// Writes `message` to the log.
struct Log {
    inputs: Vec<ParamSpec>,
}

impl Log {
    fn new() -> Self {
        Self {
            inputs: vec![
                ParamSpec::new("message", ParamType::String).required(),
                ParamSpec::new("level", ParamType::String).with_enum(["info", "warn"]),
            ],
        }
    }
}

#[async_trait]
impl ActionRule for Log {
    fn id(&self) -> &str {
        "log"
    }

    fn title(&self) -> &str {
        "Log message"
    }

    fn inputs(&self) -> &[ParamSpec] {
        &self.inputs
    }

    async fn run(&self, ctx: &RuleContext, params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
        let message = params.get_str("message").unwrap_or_default();
        if params.get_str("level") == Some("warn") {
            tracing::warn!(flow_id = %ctx.flow_id, uid = %ctx.uid, "{message}");
        } else {
            info!(flow_id = %ctx.flow_id, uid = %ctx.uid, "{message}");
        }
        let mut out = Kv::new();
        out.insert("logged".to_string(), json!(message));
        Ok(out)
    }
}

/// Creates the `dev` integration.
#[must_use]
pub fn dev_integration() -> Integration {
    Integration::new(DEV_BOT)
        .with_trigger(Ping)
        .with_trigger(Webhook::new())
        .with_trigger(Counter)
        .with_action(Echo)
        .with_action(Log::new())
}

/// Creates a registry holding the built-in integrations.
#[must_use]
pub fn builtin_registry() -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new();
    registry.register(dev_integration());
    registry
}
