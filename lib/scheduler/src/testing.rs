//! Shared fixtures for scheduler tests.

use async_trait::async_trait;
use flowbot_core::{FlowId, Kv, KvExt};
use flowbot_flows::{Engine, Flow, FlowEdge, FlowNode, FlowStore, MemoryStore};
use flowbot_integration::{
    ActionRule, Integration, IntegrationRegistry, PollResult, RuleContext, RuleError, TriggerMode,
    TriggerRule,
};
use serde_json::json;
use std::sync::Arc;

struct Go;

#[async_trait]
impl TriggerRule for Go {
    fn id(&self) -> &str {
        "go"
    }
}

struct Hook;

#[async_trait]
impl TriggerRule for Hook {
    fn id(&self) -> &str {
        "hook"
    }

    fn mode(&self) -> TriggerMode {
        TriggerMode::Webhook
    }
}

/// Emits two events per poll and advances a `cursor` in its state.
struct Counter;

#[async_trait]
impl TriggerRule for Counter {
    fn id(&self) -> &str {
        "counter"
    }

    fn mode(&self) -> TriggerMode {
        TriggerMode::Poll
    }

    async fn poll(&self, _ctx: &RuleContext, _params: &Kv, state: &Kv) -> Result<PollResult, RuleError> {
        let cursor = state.get_i64("cursor").unwrap_or(0);
        let events = vec![
            json!({"id": cursor + 1}),
            json!({"id": format!("e{}", cursor + 2)}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let mut next = Kv::new();
        next.insert("cursor".to_string(), json!(cursor + 2));
        Ok(PollResult {
            events,
            state: Some(next),
        })
    }
}

struct Broken;

#[async_trait]
impl TriggerRule for Broken {
    fn id(&self) -> &str {
        "broken"
    }

    fn mode(&self) -> TriggerMode {
        TriggerMode::Poll
    }

    async fn poll(&self, _ctx: &RuleContext, _params: &Kv, _state: &Kv) -> Result<PollResult, RuleError> {
        Err(RuleError::failed("upstream down"))
    }
}

struct Pass;

#[async_trait]
impl ActionRule for Pass {
    fn id(&self) -> &str {
        "ok"
    }

    async fn run(&self, _ctx: &RuleContext, _params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
        let mut out = Kv::new();
        out.insert("ok".to_string(), json!(true));
        Ok(out)
    }
}

struct Fail;

#[async_trait]
impl ActionRule for Fail {
    fn id(&self) -> &str {
        "fail"
    }

    async fn run(&self, _ctx: &RuleContext, _params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
        Err(RuleError::failed("boom"))
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<Engine>,
    pub registry: Arc<IntegrationRegistry>,
}

pub fn fixture() -> Fixture {
    let mut registry = IntegrationRegistry::new();
    registry.register(
        Integration::new("dev")
            .with_trigger(Go)
            .with_trigger(Hook)
            .with_trigger(Counter)
            .with_trigger(Broken)
            .with_action(Pass)
            .with_action(Fail),
    );
    let registry = Arc::new(registry);
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(store.clone(), registry.clone()));
    Fixture {
        store,
        engine,
        registry,
    }
}

impl Fixture {
    pub async fn seed(&self, nodes: Vec<FlowNode>, edges: &[(&str, &str)]) -> FlowId {
        let flow = self
            .store
            .create_flow(Flow::new("u1", "t1", "test"))
            .await
            .unwrap();
        for mut node in nodes {
            node.flow_id = flow.id;
            self.store.create_node(node).await.unwrap();
        }
        for (source, target) in edges {
            let mut edge = FlowEdge::new(*source, *target);
            edge.flow_id = flow.id;
            self.store.create_edge(edge).await.unwrap();
        }
        flow.id
    }

    pub async fn disable(&self, flow_id: FlowId) {
        let mut flow = self.store.get_flow(flow_id).await.unwrap().unwrap();
        flow.disable();
        self.store.update_flow(&flow).await.unwrap();
    }

    pub async fn node(&self, flow_id: FlowId, node_id: &str) -> FlowNode {
        self.store
            .list_nodes(flow_id)
            .await
            .unwrap()
            .into_iter()
            .find(|n| n.node_id == node_id)
            .unwrap()
    }
}
