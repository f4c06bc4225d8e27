//! Persistence contract for flows and their executions.
//!
//! [`MemoryStore`] keeps everything in process memory. It is the store the
//! daemon runs with and the fake every test uses.

use crate::error::StoreError;
use crate::model::{Execution, Flow, FlowEdge, FlowJob, FlowNode, RateLimit};
use async_trait::async_trait;
use chrono::Utc;
use flowbot_core::{ExecutionId, FlowId, FlowJobId, RateLimitId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable storage for flows, executions and rate-limit rules.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Returns a flow by ID.
    async fn get_flow(&self, flow_id: FlowId) -> Result<Option<Flow>, StoreError>;

    /// Lists flows, optionally filtered by owner and topic.
    ///
    /// An empty `uid` or `topic` matches every flow.
    async fn list_flows(&self, uid: &str, topic: &str) -> Result<Vec<Flow>, StoreError>;

    /// Creates a flow, assigning its ID.
    async fn create_flow(&self, flow: Flow) -> Result<Flow, StoreError>;

    /// Replaces a flow.
    async fn update_flow(&self, flow: &Flow) -> Result<(), StoreError>;

    /// Lists a flow's nodes in creation order.
    async fn list_nodes(&self, flow_id: FlowId) -> Result<Vec<FlowNode>, StoreError>;

    /// Creates a node, assigning its row ID.
    ///
    /// Fails with [`StoreError::Conflict`] if the flow already has a node with
    /// the same graph-local ID.
    async fn create_node(&self, node: FlowNode) -> Result<FlowNode, StoreError>;

    /// Replaces a node, matched by flow and graph-local ID.
    async fn update_node(&self, node: &FlowNode) -> Result<(), StoreError>;

    /// Lists a flow's edges in creation order.
    async fn list_edges(&self, flow_id: FlowId) -> Result<Vec<FlowEdge>, StoreError>;

    /// Creates an edge, assigning its row ID.
    async fn create_edge(&self, edge: FlowEdge) -> Result<FlowEdge, StoreError>;

    /// Returns an execution by ID.
    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Creates an execution.
    ///
    /// Fails with [`StoreError::Conflict`] if the ID is already taken.
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Replaces an execution.
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Lists a flow's executions, newest first.
    async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Result<Vec<Execution>, StoreError>;

    /// Creates a job, assigning its ID.
    async fn create_job(&self, job: FlowJob) -> Result<FlowJob, StoreError>;

    /// Replaces a job.
    async fn update_job(&self, job: &FlowJob) -> Result<(), StoreError>;

    /// Lists an execution's jobs in creation order.
    async fn list_jobs(&self, execution_id: &ExecutionId) -> Result<Vec<FlowJob>, StoreError>;

    /// Lists the rate-limit rules that apply to a flow and node.
    async fn list_rate_limits(&self, flow_id: FlowId, node_id: &str) -> Result<Vec<RateLimit>, StoreError>;

    /// Creates a rate-limit rule, assigning its ID.
    async fn create_rate_limit(&self, rule: RateLimit) -> Result<RateLimit, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    flows: Vec<Flow>,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    executions: HashMap<ExecutionId, Execution>,
    jobs: Vec<FlowJob>,
    rate_limits: Vec<RateLimit>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// An in-process [`FlowStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn get_flow(&self, flow_id: FlowId) -> Result<Option<Flow>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.flows.iter().find(|f| f.id == flow_id).cloned())
    }

    async fn list_flows(&self, uid: &str, topic: &str) -> Result<Vec<Flow>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .flows
            .iter()
            .filter(|f| uid.is_empty() || f.uid == uid)
            .filter(|f| topic.is_empty() || f.topic == topic)
            .cloned()
            .collect())
    }

    async fn create_flow(&self, mut flow: Flow) -> Result<Flow, StoreError> {
        let mut tables = self.tables.write().await;
        flow.id = FlowId::new(tables.next_id());
        tables.flows.push(flow.clone());
        Ok(flow)
    }

    async fn update_flow(&self, flow: &Flow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .flows
            .iter_mut()
            .find(|f| f.id == flow.id)
            .ok_or_else(|| not_found("flow", flow.id))?;
        *slot = flow.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn list_nodes(&self, flow_id: FlowId) -> Result<Vec<FlowNode>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .iter()
            .filter(|n| n.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn create_node(&self, mut node: FlowNode) -> Result<FlowNode, StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .nodes
            .iter()
            .any(|n| n.flow_id == node.flow_id && n.node_id == node.node_id)
        {
            return Err(StoreError::Conflict {
                entity: "node",
                id: node.node_id,
            });
        }
        node.id = tables.next_id();
        tables.nodes.push(node.clone());
        Ok(node)
    }

    async fn update_node(&self, node: &FlowNode) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .nodes
            .iter_mut()
            .find(|n| n.flow_id == node.flow_id && n.node_id == node.node_id)
            .ok_or_else(|| not_found("node", &node.node_id))?;
        *slot = node.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn list_edges(&self, flow_id: FlowId) -> Result<Vec<FlowEdge>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .iter()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn create_edge(&self, mut edge: FlowEdge) -> Result<FlowEdge, StoreError> {
        let mut tables = self.tables.write().await;
        edge.id = tables.next_id();
        tables.edges.push(edge.clone());
        Ok(edge)
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.executions.get(execution_id).cloned())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.executions.contains_key(&execution.execution_id) {
            return Err(StoreError::Conflict {
                entity: "execution",
                id: execution.execution_id.to_string(),
            });
        }
        tables
            .executions
            .insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .executions
            .get_mut(&execution.execution_id)
            .ok_or_else(|| not_found("execution", &execution.execution_id))?;
        *slot = execution.clone();
        Ok(())
    }

    async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let tables = self.tables.read().await;
        let mut executions: Vec<Execution> = tables
            .executions
            .values()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        executions.truncate(limit);
        Ok(executions)
    }

    async fn create_job(&self, mut job: FlowJob) -> Result<FlowJob, StoreError> {
        let mut tables = self.tables.write().await;
        job.id = FlowJobId::new(tables.next_id());
        tables.jobs.push(job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &FlowJob) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| not_found("job", job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn list_jobs(&self, execution_id: &ExecutionId) -> Result<Vec<FlowJob>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| &j.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn list_rate_limits(&self, flow_id: FlowId, node_id: &str) -> Result<Vec<RateLimit>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .rate_limits
            .iter()
            .filter(|r| r.applies_to(flow_id, node_id))
            .cloned()
            .collect())
    }

    async fn create_rate_limit(&self, mut rule: RateLimit) -> Result<RateLimit, StoreError> {
        let mut tables = self.tables.write().await;
        rule.id = RateLimitId::new(tables.next_id());
        tables.rate_limits.push(rule.clone());
        Ok(rule)
    }
}
