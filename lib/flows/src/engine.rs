//! Flow execution engine.
//!
//! One call executes a flow for one event:
//! 1. Open (or reuse) the execution row keyed by the execution ID
//! 2. Build the variable bag from the payload
//! 3. Select the trigger node(s) matching the trigger type
//! 4. Walk the graph depth-first from each selected trigger, running each
//!    node through the rule registry and recording a job per node
//! 5. Persist the terminal state and the final variable bag
//!
//! Executing again with the same execution ID updates the same row, which
//! makes queue retries idempotent. Panics inside the run are contained and
//! recorded on the execution.

use crate::condition::evaluate_conditions;
use crate::error::{EngineError, NodeError};
use crate::graph::FlowGraph;
use crate::model::{Execution, Flow, FlowJob, FlowNode, NodeType, TRIGGER_TYPE_SEPARATOR};
use crate::store::FlowStore;
use crate::template::{SimpleTemplateRenderer, TemplateRenderer, render_params};
use flowbot_core::{ExecutionId, FlowId, Kv, KvExt};
use flowbot_integration::{DEV_BOT, RuleContext, RuleRegistry};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default maximum walk depth.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default per-node time budget in seconds.
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 120;

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_node_timeout_secs() -> u64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum walk depth; the trigger is at depth 0. Zero means the default.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Per-node time budget in seconds.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            node_timeout_secs: default_node_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// The effective depth limit.
    #[must_use]
    pub fn effective_max_depth(&self) -> usize {
        if self.max_depth == 0 {
            DEFAULT_MAX_DEPTH
        } else {
            self.max_depth
        }
    }

    /// The per-node time budget.
    #[must_use]
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

/// Splits a trigger type into bot and rule ID.
///
/// `"bot|rule"` splits at the first separator, a bare name belongs to the
/// `dev` integration, and the empty string yields two empty parts.
#[must_use]
pub fn normalize_trigger_type(trigger_type: &str) -> (String, String) {
    if let Some((bot, rule_id)) = trigger_type.split_once(TRIGGER_TYPE_SEPARATOR) {
        return (bot.to_string(), rule_id.to_string());
    }
    if trigger_type.is_empty() {
        return (String::new(), String::new());
    }
    (DEV_BOT.to_string(), trigger_type.to_string())
}

/// Per-run walk state.
struct WalkState {
    execution_id: ExecutionId,
    ctx: RuleContext,
    variables: Kv,
    path: HashSet<String>,
}

/// Executes flows.
pub struct Engine {
    store: Arc<dyn FlowStore>,
    registry: Arc<dyn RuleRegistry>,
    renderer: Arc<dyn TemplateRenderer>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with the simple renderer and default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>, registry: Arc<dyn RuleRegistry>) -> Self {
        Self {
            store,
            registry,
            renderer: Arc::new(SimpleTemplateRenderer),
            config: EngineConfig::default(),
        }
    }

    /// Replaces the template renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes a flow under a freshly generated execution ID.
    ///
    /// # Errors
    ///
    /// See [`execute_flow_with_execution_id`](Self::execute_flow_with_execution_id).
    pub async fn execute_flow(
        &self,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<ExecutionId, EngineError> {
        self.execute_flow_with_execution_id(flow_id, None, trigger_type, trigger_id, payload)
            .await
    }

    /// Executes a flow under a caller-supplied execution ID.
    ///
    /// A missing or empty ID is replaced by a generated one. If an execution
    /// with the ID exists it is reused and reset to running.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is missing or disabled, the ID belongs
    /// to another flow, the walk is rejected (no trigger nodes, cycle, depth),
    /// a node fails, the run panics, or the store fails.
    pub async fn execute_flow_with_execution_id(
        &self,
        flow_id: FlowId,
        execution_id: Option<ExecutionId>,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<ExecutionId, EngineError> {
        let execution_id = execution_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(ExecutionId::generate);

        let mut slot = None;
        let run = self.run(
            flow_id,
            &execution_id,
            trigger_type,
            trigger_id,
            payload,
            &mut slot,
        );

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => Ok(execution_id),
            Ok(Err(e)) => Err(e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    flow_id = %flow_id,
                    execution_id = %execution_id,
                    panic = %message,
                    "flow execution panicked"
                );
                if let Some(mut execution) = slot {
                    let variables = std::mem::take(&mut execution.variables);
                    execution.fail(format!("panic: {message}"), variables);
                    if let Err(e) = self.store.update_execution(&execution).await {
                        warn!(execution_id = %execution_id, error = %e, "failed to record panicked execution");
                    }
                }
                Err(EngineError::Panicked { message })
            }
        }
    }

    async fn run(
        &self,
        flow_id: FlowId,
        execution_id: &ExecutionId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
        slot: &mut Option<Execution>,
    ) -> Result<(), EngineError> {
        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(EngineError::FlowNotFound { flow_id })?;
        if !flow.enabled {
            return Err(EngineError::FlowDisabled { flow_id });
        }

        let execution = slot.insert(
            self.open_execution(flow_id, execution_id, trigger_type, trigger_id, &payload)
                .await?,
        );
        info!(
            flow_id = %flow_id,
            execution_id = %execution_id,
            trigger_type,
            "flow execution started"
        );

        let mut state = WalkState {
            execution_id: execution_id.clone(),
            ctx: RuleContext::new(flow.id, flow.uid.clone(), flow.topic.clone())
                .with_timeout(self.config.node_timeout()),
            variables: initial_variables(payload, trigger_type, trigger_id),
            path: HashSet::new(),
        };

        let outcome = self.walk(&flow, trigger_type, &mut state).await;
        match &outcome {
            Ok(()) => {
                execution.succeed(state.variables);
                info!(flow_id = %flow_id, execution_id = %execution_id, "flow execution succeeded");
            }
            Err(e) => {
                execution.fail(e.to_string(), state.variables);
                warn!(flow_id = %flow_id, execution_id = %execution_id, error = %e, "flow execution failed");
            }
        }
        self.store.update_execution(execution).await?;
        outcome
    }

    async fn open_execution(
        &self,
        flow_id: FlowId,
        execution_id: &ExecutionId,
        trigger_type: &str,
        trigger_id: &str,
        payload: &Kv,
    ) -> Result<Execution, EngineError> {
        if let Some(existing) = self.store.get_execution(execution_id).await? {
            return self
                .reuse_execution(existing, flow_id, trigger_type, trigger_id, payload)
                .await;
        }

        let mut execution = Execution::new(execution_id.clone(), flow_id);
        execution.start(trigger_type, trigger_id, payload.clone());
        match self.store.create_execution(&execution).await {
            Ok(()) => Ok(execution),
            Err(e) if e.is_conflict() => {
                debug!(execution_id = %execution_id, "execution created concurrently, reusing");
                let existing = self
                    .store
                    .get_execution(execution_id)
                    .await?
                    .ok_or(EngineError::Store(e))?;
                self.reuse_execution(existing, flow_id, trigger_type, trigger_id, payload)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reuse_execution(
        &self,
        mut execution: Execution,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: &Kv,
    ) -> Result<Execution, EngineError> {
        if execution.flow_id != flow_id {
            return Err(EngineError::ExecutionBoundToOtherFlow {
                execution_id: execution.execution_id,
                bound_to: execution.flow_id,
            });
        }
        execution.start(trigger_type, trigger_id, payload.clone());
        self.store.update_execution(&execution).await?;
        Ok(execution)
    }

    async fn walk(&self, flow: &Flow, trigger_type: &str, state: &mut WalkState) -> Result<(), EngineError> {
        let nodes = self.store.list_nodes(flow.id).await?;
        let edges = self.store.list_edges(flow.id).await?;
        let graph = FlowGraph::build(nodes, edges);

        let triggers = graph.trigger_nodes();
        if triggers.is_empty() {
            return Err(EngineError::NoTriggerNodes { flow_id: flow.id });
        }

        let (bot, rule_id) = normalize_trigger_type(trigger_type);
        let scoped = !bot.is_empty() && !rule_id.is_empty();

        for trigger in triggers {
            if scoped && (trigger.bot != bot || trigger.rule_id != rule_id) {
                continue;
            }
            self.execute_node_chain(&graph, trigger, &mut *state, 0)
                .await?;
        }
        Ok(())
    }

    fn execute_node_chain<'a>(
        &'a self,
        graph: &'a FlowGraph,
        node: &'a FlowNode,
        state: &'a mut WalkState,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let max_depth = self.config.effective_max_depth();
            if depth >= max_depth {
                return Err(EngineError::MaxDepthExceeded {
                    node_id: node.node_id.clone(),
                    max_depth,
                });
            }
            if !state.path.insert(node.node_id.clone()) {
                return Err(EngineError::CycleDetected {
                    node_id: node.node_id.clone(),
                });
            }

            let outcome = self.enter_node(graph, node, &mut *state, depth).await;
            state.path.remove(&node.node_id);
            outcome
        }
        .boxed()
    }

    async fn enter_node(
        &self,
        graph: &FlowGraph,
        node: &FlowNode,
        state: &mut WalkState,
        depth: usize,
    ) -> Result<(), EngineError> {
        let result = self.run_node(node, state).await?;
        state.variables.extend(result);

        for next in graph.successors(&node.node_id) {
            if next.node_type.is_gate() && !evaluate_conditions(&next.conditions, &state.variables) {
                debug!(node_id = %next.node_id, "conditions not met, skipping branch");
                continue;
            }
            self.execute_node_chain(graph, next, &mut *state, depth + 1)
                .await?;
        }
        Ok(())
    }

    /// Runs one node and records its job.
    async fn run_node(&self, node: &FlowNode, state: &WalkState) -> Result<Kv, EngineError> {
        let job = match self
            .store
            .create_job(FlowJob::start(state.execution_id.clone(), node))
            .await
        {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(node_id = %node.node_id, error = %e, "failed to record job start");
                None
            }
        };

        debug!(node_id = %node.node_id, node_type = %node.node_type, "executing node");
        let outcome = self.execute_node(node, &state.ctx, &state.variables).await;

        if let Some(mut job) = job {
            let transition = match &outcome {
                Ok(result) => job.succeed(result.clone()),
                Err(e) => job.fail(e.to_string()),
            };
            match transition {
                Ok(()) => {
                    if let Err(e) = self.store.update_job(&job).await {
                        warn!(node_id = %node.node_id, error = %e, "failed to record job result");
                    }
                }
                Err(e) => warn!(node_id = %node.node_id, error = %e, "job already finished"),
            }
        }

        outcome.map_err(|source| EngineError::NodeExecutionFailed {
            node_id: node.node_id.clone(),
            source,
        })
    }

    async fn execute_node(&self, node: &FlowNode, ctx: &RuleContext, variables: &Kv) -> Result<Kv, NodeError> {
        let params = render_params(self.renderer.as_ref(), &node.parameters, variables);
        let timeout = ctx.timeout;
        tokio::time::timeout(timeout, self.invoke_rule(node, ctx, &params, variables))
            .await
            .map_err(|_| NodeError::Timeout { after: timeout })?
    }

    async fn invoke_rule(
        &self,
        node: &FlowNode,
        ctx: &RuleContext,
        params: &Kv,
        variables: &Kv,
    ) -> Result<Kv, NodeError> {
        match node.node_type {
            NodeType::Trigger => {
                let rule = self.registry.find_trigger(&node.bot, &node.rule_id)?;
                rule.config(params)?;
                let payload = variables.get_object("payload").cloned().unwrap_or_default();
                Ok(rule.extract(ctx, params, &payload).await?)
            }
            NodeType::Action => {
                let rule = self.registry.find_action(&node.bot, &node.rule_id)?;
                rule.validate(params)?;
                Ok(rule.run(ctx, params, variables).await?)
            }
            NodeType::Filter | NodeType::Condition => Ok(Kv::new()),
        }
    }
}

fn initial_variables(payload: Kv, trigger_type: &str, trigger_id: &str) -> Kv {
    let mut variables = payload.clone();
    variables.insert("payload".to_string(), JsonValue::Object(payload));
    variables.insert(
        "__trigger_type".to_string(),
        JsonValue::String(trigger_type.to_string()),
    );
    variables.insert(
        "__trigger_id".to_string(),
        JsonValue::String(trigger_id.to_string()),
    );
    variables
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, ExecutionState, FlowEdge, JobState};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use flowbot_integration::{
        ActionRule, Integration, IntegrationRegistry, ParamSpec, ParamType, RuleError, TriggerRule,
    };
    use serde_json::json;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, Kv)>>>;

    struct Ping {
        id: &'static str,
    }

    #[async_trait]
    impl TriggerRule for Ping {
        fn id(&self) -> &str {
            self.id
        }
    }

    /// Records its rendered params and returns `{<id>: true}`.
    struct Record {
        id: &'static str,
        calls: Calls,
    }

    #[async_trait]
    impl ActionRule for Record {
        fn id(&self) -> &str {
            self.id
        }

        async fn run(&self, _ctx: &RuleContext, params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
            self.calls
                .lock()
                .unwrap()
                .push((self.id.to_string(), params.clone()));
            let mut out = Kv::new();
            out.insert(self.id.to_string(), json!(true));
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

    struct Explode;

    #[async_trait]
    impl ActionRule for Explode {
        fn id(&self) -> &str {
            "explode"
        }

        async fn run(&self, _ctx: &RuleContext, _params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
            panic!("kaboom");
        }
    }

    struct Slow;

    #[async_trait]
    impl ActionRule for Slow {
        fn id(&self) -> &str {
            "slow"
        }

        async fn run(&self, _ctx: &RuleContext, _params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(Kv::new())
        }
    }

    struct Strict {
        inputs: Vec<ParamSpec>,
    }

    #[async_trait]
    impl ActionRule for Strict {
        fn id(&self) -> &str {
            "strict"
        }

        fn inputs(&self) -> &[ParamSpec] {
            &self.inputs
        }

        async fn run(&self, _ctx: &RuleContext, _params: &Kv, _variables: &Kv) -> Result<Kv, RuleError> {
            Ok(Kv::new())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Engine,
        calls: Calls,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let mut dev = Integration::new("dev")
            .with_trigger(Ping { id: "a" })
            .with_trigger(Ping { id: "b" })
            .with_action(Fail)
            .with_action(Explode)
            .with_action(Slow)
            .with_action(Strict {
                inputs: vec![ParamSpec::new("message", ParamType::String).required()],
            });
        for id in ["x", "y", "z", "w"] {
            dev = dev.with_action(Record {
                id,
                calls: Arc::clone(&calls),
            });
        }
        let mut registry = IntegrationRegistry::new();
        registry.register(dev);

        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), Arc::new(registry)).with_config(config);
        Fixture {
            store,
            engine,
            calls,
        }
    }

    async fn seed(store: &MemoryStore, nodes: Vec<FlowNode>, edges: &[(&str, &str)]) -> FlowId {
        let flow = store.create_flow(Flow::new("u1", "t1", "test")).await.unwrap();
        for mut node in nodes {
            node.flow_id = flow.id;
            store.create_node(node).await.unwrap();
        }
        for (source, target) in edges {
            let mut edge = FlowEdge::new(*source, *target);
            edge.flow_id = flow.id;
            store.create_edge(edge).await.unwrap();
        }
        flow.id
    }

    fn kv(value: JsonValue) -> Kv {
        value.as_object().cloned().unwrap()
    }

    fn called(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn action(id: &str) -> FlowNode {
        FlowNode::action(id, "dev", id)
    }

    #[test]
    fn normalize_trigger_type_forms() {
        assert_eq!(
            normalize_trigger_type("github|push"),
            ("github".to_string(), "push".to_string())
        );
        assert_eq!(
            normalize_trigger_type("a|b|c"),
            ("a".to_string(), "b|c".to_string())
        );
        assert_eq!(
            normalize_trigger_type("ping"),
            ("dev".to_string(), "ping".to_string())
        );
        assert_eq!(normalize_trigger_type(""), (String::new(), String::new()));
    }

    #[test]
    fn zero_max_depth_uses_default() {
        let config = EngineConfig {
            max_depth: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_max_depth(), DEFAULT_MAX_DEPTH);
        assert_eq!(EngineConfig::default().node_timeout(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn executes_chain_and_records_jobs() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![FlowNode::trigger("t", "dev", "a"), action("x"), action("y")],
            &[("t", "x"), ("x", "y")],
        )
        .await;

        let id = f
            .engine
            .execute_flow(flow_id, "dev|a", "evt-1", kv(json!({"user": "ann"})))
            .await
            .unwrap();

        assert_eq!(called(&f.calls), vec!["x", "y"]);
        let exec = f.store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Succeeded);
        assert!(exec.finished_at.is_some());
        assert_eq!(exec.variables["user"], json!("ann"));
        assert_eq!(exec.variables["payload"], json!({"user": "ann"}));
        assert_eq!(exec.variables["__trigger_type"], json!("dev|a"));
        assert_eq!(exec.variables["__trigger_id"], json!("evt-1"));
        assert_eq!(exec.variables["x"], json!(true));

        let jobs = f.store.list_jobs(&id).await.unwrap();
        let nodes: Vec<&str> = jobs.iter().map(|j| j.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["t", "x", "y"]);
        assert!(jobs.iter().all(|j| j.state == JobState::Succeeded));
    }

    #[tokio::test]
    async fn same_execution_id_reuses_row() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(&f.store, vec![FlowNode::trigger("t", "dev", "a")], &[]).await;
        let id = ExecutionId::new("fixed");

        f.engine
            .execute_flow_with_execution_id(flow_id, Some(id.clone()), "dev|a", "1", Kv::new())
            .await
            .unwrap();
        let first = f.store.get_execution(&id).await.unwrap().unwrap();

        let again = f
            .engine
            .execute_flow_with_execution_id(flow_id, Some(id.clone()), "dev|a", "2", Kv::new())
            .await
            .unwrap();
        assert_eq!(again, id);

        let executions = f.store.list_executions(flow_id, 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].trigger_id, "2");
        assert_eq!(executions[0].started_at, first.started_at);
        assert_eq!(executions[0].state, ExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn execution_bound_to_other_flow_is_rejected() {
        let f = fixture(EngineConfig::default());
        let flow_a = seed(&f.store, vec![FlowNode::trigger("t", "dev", "a")], &[]).await;
        let flow_b = seed(&f.store, vec![FlowNode::trigger("t", "dev", "a")], &[]).await;
        let id = ExecutionId::new("shared");

        f.engine
            .execute_flow_with_execution_id(flow_a, Some(id.clone()), "dev|a", "1", Kv::new())
            .await
            .unwrap();
        let before = f.store.get_execution(&id).await.unwrap().unwrap();

        let err = f
            .engine
            .execute_flow_with_execution_id(flow_b, Some(id.clone()), "dev|a", "2", Kv::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ExecutionBoundToOtherFlow {
                execution_id: id.clone(),
                bound_to: flow_a,
            }
        );
        assert_eq!(f.store.get_execution(&id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn cycle_fails_the_execution() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![FlowNode::trigger("t", "dev", "a"), action("x"), action("y")],
            &[("t", "x"), ("x", "y"), ("y", "t")],
        )
        .await;
        let id = ExecutionId::new("cyc");

        let err = f
            .engine
            .execute_flow_with_execution_id(flow_id, Some(id.clone()), "", "", Kv::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::CycleDetected {
                node_id: "t".to_string()
            }
        );
        assert_eq!(called(&f.calls), vec!["x", "y"]);
        let jobs = f.store.list_jobs(&id).await.unwrap();
        let nodes: Vec<&str> = jobs.iter().map(|j| j.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["t", "x", "y"]);

        let exec = f.store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.error.as_deref(), Some("cycle detected at node t"));
    }

    #[tokio::test]
    async fn depth_limit_counts_the_trigger() {
        let config = EngineConfig {
            max_depth: 3,
            ..EngineConfig::default()
        };

        let f = fixture(config.clone());
        let ok = seed(
            &f.store,
            vec![FlowNode::trigger("t", "dev", "a"), action("x"), action("y")],
            &[("t", "x"), ("x", "y")],
        )
        .await;
        assert!(f.engine.execute_flow(ok, "", "", Kv::new()).await.is_ok());

        let f = fixture(config);
        let too_deep = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                action("x"),
                action("y"),
                action("z"),
            ],
            &[("t", "x"), ("x", "y"), ("y", "z")],
        )
        .await;
        let err = f.engine.execute_flow(too_deep, "", "", Kv::new()).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::MaxDepthExceeded {
                node_id: "z".to_string(),
                max_depth: 3
            }
        );
        assert_eq!(called(&f.calls), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn failing_filter_prunes_branch_without_job() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::filter("gold", vec![Condition::new("tier", "eq", "gold")]),
                FlowNode::condition("big", vec![Condition::new("amount", ">", 100)]),
                action("x"),
                action("y"),
            ],
            &[("t", "gold"), ("gold", "x"), ("t", "big"), ("big", "y")],
        )
        .await;

        let id = f
            .engine
            .execute_flow(flow_id, "a", "", kv(json!({"tier": "gold", "amount": "50"})))
            .await
            .unwrap();

        assert_eq!(called(&f.calls), vec!["x"]);
        let jobs = f.store.list_jobs(&id).await.unwrap();
        let nodes: Vec<&str> = jobs.iter().map(|j| j.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["t", "gold", "x"]);
    }

    #[tokio::test]
    async fn parameters_are_rendered_but_jobs_keep_raw_params() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                action("x").with_parameters(kv(json!({
                    "text": "hi {{name}} ({{__trigger_id}})",
                    "list": ["{{count}}"],
                    "missing": "{{nope}}"
                }))),
            ],
            &[("t", "x")],
        )
        .await;

        let id = f
            .engine
            .execute_flow(flow_id, "dev|a", "e9", kv(json!({"name": "Ann", "count": 2})))
            .await
            .unwrap();

        let calls = f.calls.lock().unwrap().clone();
        assert_eq!(
            JsonValue::Object(calls[0].1.clone()),
            json!({"text": "hi Ann (e9)", "list": ["2"], "missing": "{{nope}}"})
        );
        let jobs = f.store.list_jobs(&id).await.unwrap();
        assert_eq!(jobs[1].params["text"], json!("hi {{name}} ({{__trigger_id}})"));
    }

    #[tokio::test]
    async fn trigger_key_selects_trigger_nodes() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("ta", "dev", "a"),
                FlowNode::trigger("tb", "dev", "b"),
                action("x"),
                action("y"),
            ],
            &[("ta", "x"), ("tb", "y")],
        )
        .await;

        f.engine.execute_flow(flow_id, "dev|b", "", Kv::new()).await.unwrap();
        assert_eq!(called(&f.calls), vec!["y"]);

        f.calls.lock().unwrap().clear();
        f.engine.execute_flow(flow_id, "a", "", Kv::new()).await.unwrap();
        assert_eq!(called(&f.calls), vec!["x"]);

        f.calls.lock().unwrap().clear();
        f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap();
        assert_eq!(called(&f.calls), vec!["x", "y"]);

        f.calls.lock().unwrap().clear();
        let id = f
            .engine
            .execute_flow(flow_id, "github|push", "", Kv::new())
            .await
            .unwrap();
        assert!(called(&f.calls).is_empty());
        let exec = f.store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn flow_without_triggers_fails() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(&f.store, vec![action("x")], &[]).await;
        let err = f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap_err();
        assert_eq!(err, EngineError::NoTriggerNodes { flow_id });
    }

    #[tokio::test]
    async fn missing_and_disabled_flows_are_rejected() {
        let f = fixture(EngineConfig::default());
        let err = f
            .engine
            .execute_flow(FlowId::new(999), "", "", Kv::new())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::FlowNotFound { flow_id: FlowId::new(999) });

        let flow_id = seed(&f.store, vec![FlowNode::trigger("t", "dev", "a")], &[]).await;
        let mut flow = f.store.get_flow(flow_id).await.unwrap().unwrap();
        flow.disable();
        f.store.update_flow(&flow).await.unwrap();
        let err = f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap_err();
        assert_eq!(err, EngineError::FlowDisabled { flow_id });
        assert!(f.store.list_executions(flow_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_failure_stops_the_walk() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::action("f", "dev", "fail"),
                action("x"),
            ],
            &[("t", "f"), ("t", "x")],
        )
        .await;
        let id = ExecutionId::new("fails");

        let err = f
            .engine
            .execute_flow_with_execution_id(flow_id, Some(id.clone()), "", "", Kv::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeExecutionFailed { ref node_id, .. } if node_id == "f"));
        assert!(called(&f.calls).is_empty());

        let jobs = f.store.list_jobs(&id).await.unwrap();
        assert_eq!(jobs[1].state, JobState::Failed);
        assert_eq!(jobs[1].error.as_deref(), Some("boom"));

        let exec = f.store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.error.as_deref(), Some("node f execution failed: boom"));
        assert_eq!(exec.variables["__trigger_id"], json!(""));
    }

    #[tokio::test]
    async fn spec_validation_failure_is_a_node_failure() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::action("s", "dev", "strict"),
            ],
            &[("t", "s")],
        )
        .await;
        let err = f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap_err();
        let EngineError::NodeExecutionFailed { source, .. } = err else {
            panic!("expected node failure");
        };
        let NodeError::Rule(rule_err) = source else {
            panic!("expected rule error");
        };
        assert_eq!(
            rule_err.as_validation().unwrap().field("message"),
            Some("is required")
        );
    }

    #[tokio::test]
    async fn unknown_rule_is_a_node_failure() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::action("g", "github", "comment"),
            ],
            &[("t", "g")],
        )
        .await;
        let err = f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NodeExecutionFailed {
                source: NodeError::Registry(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn panic_is_contained_and_recorded() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::action("p", "dev", "explode"),
            ],
            &[("t", "p")],
        )
        .await;
        let id = ExecutionId::new("panics");

        let err = f
            .engine
            .execute_flow_with_execution_id(flow_id, Some(id.clone()), "", "", Kv::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Panicked {
                message: "kaboom".to_string()
            }
        );
        let exec = f.store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.error.as_deref(), Some("panic: kaboom"));
        assert!(exec.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_node_times_out() {
        let f = fixture(EngineConfig {
            node_timeout_secs: 5,
            ..EngineConfig::default()
        });
        let flow_id = seed(
            &f.store,
            vec![
                FlowNode::trigger("t", "dev", "a"),
                FlowNode::action("s", "dev", "slow"),
            ],
            &[("t", "s")],
        )
        .await;
        let err = f.engine.execute_flow(flow_id, "", "", Kv::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NodeExecutionFailed {
                source: NodeError::Timeout { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_execution_id_is_generated() {
        let f = fixture(EngineConfig::default());
        let flow_id = seed(&f.store, vec![FlowNode::trigger("t", "dev", "a")], &[]).await;
        let id = f
            .engine
            .execute_flow_with_execution_id(flow_id, Some(ExecutionId::new("  ")), "", "", Kv::new())
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert!(f.store.get_execution(&id).await.unwrap().is_some());
    }
}
