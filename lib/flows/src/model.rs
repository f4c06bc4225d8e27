//! Persisted flow records.
//!
//! A flow is a directed graph of nodes. Executing it for one event produces
//! an [`Execution`] row plus one [`FlowJob`] row per node that ran.

use crate::error::TransitionError;
use chrono::{DateTime, TimeDelta, Utc};
use flowbot_core::{ExecutionId, FlowId, FlowJobId, Kv, RateLimitId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Separator between bot and rule ID in a trigger type.
pub const TRIGGER_TYPE_SEPARATOR: char = '|';

/// A stored automation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Store-assigned ID.
    #[serde(default)]
    pub id: FlowId,
    /// Owner.
    #[serde(default)]
    pub uid: String,
    /// Topic the flow belongs to.
    #[serde(default)]
    pub topic: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Disabled flows are never executed.
    #[serde(default)]
    pub enabled: bool,
    /// When the flow was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the flow was last modified.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Creates an enabled flow. The store assigns the ID on creation.
    #[must_use]
    pub fn new(uid: impl Into<String>, topic: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: FlowId::default(),
            uid: uid.into(),
            topic: topic.into(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enables the flow.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.updated_at = Utc::now();
    }

    /// Disables the flow.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.updated_at = Utc::now();
    }
}

/// The role of a node in a flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point; turns an event into variables.
    Trigger,
    /// Performs a side effect.
    Action,
    /// Gates the branch below it.
    Filter,
    /// Gates the branch below it.
    Condition,
}

impl NodeType {
    /// Returns true for node types whose conditions gate entry.
    #[must_use]
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Filter | Self::Condition)
    }

    /// The lowercase name used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Filter => "filter",
            Self::Condition => "condition",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison evaluated against the variable bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Variable name to read.
    pub variable: String,
    /// Comparison operator, e.g. `eq`, `>=`, `contains`.
    pub operator: String,
    /// Right-hand side.
    #[serde(default)]
    pub value: JsonValue,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(
        variable: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        Self {
            variable: variable.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// A node in a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Store-assigned row ID.
    #[serde(default)]
    pub id: i64,
    /// The owning flow.
    #[serde(default)]
    pub flow_id: FlowId,
    /// Graph-local ID, unique within the flow.
    pub node_id: String,
    /// Node role.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Integration name.
    #[serde(default)]
    pub bot: String,
    /// Rule ID within the integration.
    #[serde(default)]
    pub rule_id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Rule parameters; string values may contain `{{variable}}` placeholders.
    #[serde(default)]
    pub parameters: Kv,
    /// AND-combined gate conditions (filter and condition nodes).
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Opaque persisted state, e.g. a poll cursor.
    #[serde(default)]
    pub variables: Kv,
    /// When the node was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the node was last modified.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl FlowNode {
    fn new(node_id: impl Into<String>, node_type: NodeType) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            flow_id: FlowId::default(),
            node_id: node_id.into(),
            node_type,
            bot: String::new(),
            rule_id: String::new(),
            label: String::new(),
            parameters: Kv::new(),
            conditions: Vec::new(),
            variables: Kv::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a trigger node.
    #[must_use]
    pub fn trigger(
        node_id: impl Into<String>,
        bot: impl Into<String>,
        rule_id: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(node_id, NodeType::Trigger);
        node.bot = bot.into();
        node.rule_id = rule_id.into();
        node
    }

    /// Creates an action node.
    #[must_use]
    pub fn action(
        node_id: impl Into<String>,
        bot: impl Into<String>,
        rule_id: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(node_id, NodeType::Action);
        node.bot = bot.into();
        node.rule_id = rule_id.into();
        node
    }

    /// Creates a filter node.
    #[must_use]
    pub fn filter(node_id: impl Into<String>, conditions: Vec<Condition>) -> Self {
        let mut node = Self::new(node_id, NodeType::Filter);
        node.conditions = conditions;
        node
    }

    /// Creates a condition node.
    #[must_use]
    pub fn condition(node_id: impl Into<String>, conditions: Vec<Condition>) -> Self {
        let mut node = Self::new(node_id, NodeType::Condition);
        node.conditions = conditions;
        node
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Kv) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The `bot|rule` trigger type this node answers to.
    #[must_use]
    pub fn trigger_type(&self) -> String {
        format!("{}{TRIGGER_TYPE_SEPARATOR}{}", self.bot, self.rule_id)
    }
}

/// A directed edge between two nodes of the same flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Store-assigned row ID.
    #[serde(default)]
    pub id: i64,
    /// The owning flow.
    #[serde(default)]
    pub flow_id: FlowId,
    /// Graph-local ID of the source node.
    pub source_node: String,
    /// Graph-local ID of the target node.
    pub target_node: String,
    /// Free-form label; does not affect the walk.
    #[serde(rename = "type", default)]
    pub edge_type: String,
    /// When the edge was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl FlowEdge {
    /// Creates an edge.
    #[must_use]
    pub fn new(source_node: impl Into<String>, target_node: impl Into<String>) -> Self {
        Self {
            id: 0,
            flow_id: FlowId::default(),
            source_node: source_node.into(),
            target_node: target_node.into(),
            edge_type: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// The state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not yet running.
    Pending,
    /// Walking the graph.
    Running,
    /// Every entered node succeeded.
    Succeeded,
    /// A node failed, the walk was rejected, or the run panicked.
    Failed,
}

impl ExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One run of a flow for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Idempotency key; executing again with the same ID updates this row.
    pub execution_id: ExecutionId,
    /// The flow being executed.
    pub flow_id: FlowId,
    /// `bot|rule` key selecting the trigger node(s).
    pub trigger_type: String,
    /// Caller-supplied event ID.
    pub trigger_id: String,
    /// Current state.
    pub state: ExecutionState,
    /// The event payload.
    pub payload: Kv,
    /// The variable bag at the end of the run.
    pub variables: Kv,
    /// Error message if failed.
    pub error: Option<String>,
    /// When the run first started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(execution_id: ExecutionId, flow_id: FlowId) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            flow_id,
            trigger_type: String::new(),
            trigger_id: String::new(),
            state: ExecutionState::Pending,
            payload: Kv::new(),
            variables: Kv::new(),
            error: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Puts the execution into the running state for a (re)run.
    ///
    /// The first start time is kept; error and finish time are cleared and
    /// the trigger fields and payload are replaced.
    pub fn start(&mut self, trigger_type: &str, trigger_id: &str, payload: Kv) {
        let now = Utc::now();
        self.state = ExecutionState::Running;
        self.trigger_type = trigger_type.to_string();
        self.trigger_id = trigger_id.to_string();
        self.payload = payload;
        self.error = None;
        self.finished_at = None;
        self.started_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Marks the execution as succeeded.
    pub fn succeed(&mut self, variables: Kv) {
        let now = Utc::now();
        self.state = ExecutionState::Succeeded;
        self.variables = variables;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the execution as failed.
    pub fn fail(&mut self, error: impl Into<String>, variables: Kv) {
        let now = Utc::now();
        self.state = ExecutionState::Failed;
        self.error = Some(error.into());
        self.variables = variables;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// The state of one node's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The node is executing.
    Start,
    /// The node succeeded.
    Succeeded,
    /// The node failed.
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Audit record of one node's execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowJob {
    /// Store-assigned ID.
    pub id: FlowJobId,
    /// The flow being executed.
    pub flow_id: FlowId,
    /// The run this job belongs to.
    pub execution_id: ExecutionId,
    /// Graph-local node ID.
    pub node_id: String,
    /// Node role.
    pub node_type: NodeType,
    /// Integration name.
    pub bot: String,
    /// Rule ID.
    pub rule_id: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Current state.
    pub state: JobState,
    /// The node's stored (unrendered) parameters.
    pub params: Kv,
    /// What the node produced.
    pub result: Kv,
    /// Error message if failed.
    pub error: Option<String>,
    /// When the job started.
    pub started_at: DateTime<Utc>,
    /// When the job finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl FlowJob {
    /// Creates a job in the start state for a node.
    #[must_use]
    pub fn start(execution_id: ExecutionId, node: &FlowNode) -> Self {
        let now = Utc::now();
        Self {
            id: FlowJobId::default(),
            flow_id: node.flow_id,
            execution_id,
            node_id: node.node_id.clone(),
            node_type: node.node_type,
            bot: node.bot.clone(),
            rule_id: node.rule_id.clone(),
            attempt: 1,
            state: JobState::Start,
            params: node.parameters.clone(),
            result: Kv::new(),
            error: None,
            started_at: now,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the job as succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the job already reached a terminal state.
    pub fn succeed(&mut self, result: Kv) -> Result<(), TransitionError> {
        self.finish(JobState::Succeeded)?;
        self.result = result;
        Ok(())
    }

    /// Marks the job as failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job already reached a terminal state.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.finish(JobState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn finish(&mut self, to: JobState) -> Result<(), TransitionError> {
        if self.state != JobState::Start {
            return Err(TransitionError {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        self.state = to;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// Unit of a rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowUnit {
    /// Minutes.
    Minute,
    /// Hours.
    Hour,
    /// Days.
    Day,
    /// Seconds; also used for unrecognized units.
    #[default]
    #[serde(other)]
    Second,
}

impl WindowUnit {
    /// Length of one unit.
    #[must_use]
    pub fn as_delta(&self) -> TimeDelta {
        match self {
            Self::Second => TimeDelta::seconds(1),
            Self::Minute => TimeDelta::minutes(1),
            Self::Hour => TimeDelta::hours(1),
            Self::Day => TimeDelta::days(1),
        }
    }
}

/// A persisted rate-limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Store-assigned ID.
    #[serde(default)]
    pub id: RateLimitId,
    /// Flow the rule applies to; `None` applies to every flow.
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    /// Node the rule applies to; `None` applies to every node.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Number of units in the window.
    pub window_size: u32,
    /// Unit of the window.
    #[serde(default)]
    pub window_unit: WindowUnit,
    /// Maximum executions per window.
    pub limit_value: u32,
}

impl RateLimit {
    /// Creates a rule scoped to one flow.
    #[must_use]
    pub fn for_flow(flow_id: FlowId, window_size: u32, window_unit: WindowUnit, limit_value: u32) -> Self {
        Self {
            id: RateLimitId::default(),
            flow_id: Some(flow_id),
            node_id: None,
            window_size,
            window_unit,
            limit_value,
        }
    }

    /// Length of the window.
    #[must_use]
    pub fn window(&self) -> TimeDelta {
        self.window_unit.as_delta() * i32::try_from(self.window_size).unwrap_or(i32::MAX)
    }

    /// Returns true if the rule applies to the given flow and node.
    #[must_use]
    pub fn applies_to(&self, flow_id: FlowId, node_id: &str) -> bool {
        self.flow_id.is_none_or(|id| id == flow_id)
            && self.node_id.as_deref().is_none_or(|id| id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execution_restart_keeps_first_start_time() {
        let mut exec = Execution::new(ExecutionId::new("e1"), FlowId::new(1));
        exec.start("dev|ping", "a", Kv::new());
        let first = exec.started_at;
        exec.fail("boom", Kv::new());
        assert!(exec.state.is_terminal());

        exec.start("dev|ping", "b", Kv::new());
        assert_eq!(exec.started_at, first);
        assert_eq!(exec.state, ExecutionState::Running);
        assert_eq!(exec.trigger_id, "b");
        assert!(exec.error.is_none());
        assert!(exec.finished_at.is_none());
    }

    #[test]
    fn job_allows_only_one_terminal_transition() {
        let node = FlowNode::action("a1", "dev", "echo");
        let mut job = FlowJob::start(ExecutionId::new("e1"), &node);
        assert_eq!(job.state, JobState::Start);
        job.succeed(Kv::new()).unwrap();
        let err = job.fail("late").unwrap_err();
        assert_eq!(err.from, "succeeded");
        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.error.is_none());
    }

    #[test]
    fn node_serializes_type_field() {
        let node = FlowNode::trigger("t1", "dev", "ping");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], json!("trigger"));
        assert_eq!(node.trigger_type(), "dev|ping");
    }

    #[test]
    fn rate_limit_window_and_scope() {
        let rule = RateLimit::for_flow(FlowId::new(7), 2, WindowUnit::Minute, 5);
        assert_eq!(rule.window(), TimeDelta::seconds(120));
        assert!(rule.applies_to(FlowId::new(7), "any"));
        assert!(!rule.applies_to(FlowId::new(8), "any"));

        let global = RateLimit {
            node_id: Some("n1".to_string()),
            flow_id: None,
            ..rule
        };
        assert!(global.applies_to(FlowId::new(8), "n1"));
        assert!(!global.applies_to(FlowId::new(8), "n2"));
    }

    #[test]
    fn unknown_window_unit_is_seconds() {
        let unit: WindowUnit = serde_json::from_value(json!("fortnight")).unwrap();
        assert_eq!(unit, WindowUnit::Second);
    }
}
