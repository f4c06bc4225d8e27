//! Error types for the flows crate.
//!
//! - `StoreError`: persistence failures
//! - `TransitionError`: an illegal state change on a record
//! - `NodeError`: why a single node failed
//! - `EngineError`: why an execution as a whole failed
//! - `RateLimitError`: the rate limiter could not load or evaluate its rules

use flowbot_core::{ExecutionId, FlowId, RateLimitId};
use flowbot_integration::{RegistryError, RuleError};
use std::fmt;
use std::time::Duration;

/// Errors from a [`FlowStore`](crate::store::FlowStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist.
    NotFound { entity: &'static str, id: String },
    /// A record with the same unique key already exists.
    Conflict { entity: &'static str, id: String },
    /// The backend failed.
    Backend { reason: String },
}

impl StoreError {
    /// Returns true for unique-key conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::Backend { reason } => write!(f, "store error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// An illegal state transition on a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// The current state.
    pub from: String,
    /// The requested state.
    pub to: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Why a single node failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node's rule could not be resolved.
    Registry(RegistryError),
    /// The rule rejected its parameters or failed while running.
    Rule(RuleError),
    /// The rule did not finish within the node timeout.
    Timeout { after: Duration },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "{e}"),
            Self::Rule(e) => write!(f, "{e}"),
            Self::Timeout { after } => write!(f, "timed out after {}s", after.as_secs()),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<RegistryError> for NodeError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<RuleError> for NodeError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

/// Errors from flow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The flow does not exist.
    FlowNotFound { flow_id: FlowId },
    /// The flow exists but is disabled.
    FlowDisabled { flow_id: FlowId },
    /// The execution ID is already used by another flow.
    ExecutionBoundToOtherFlow {
        execution_id: ExecutionId,
        bound_to: FlowId,
    },
    /// The flow has no trigger node.
    NoTriggerNodes { flow_id: FlowId },
    /// The walk reached a node already on the current path.
    CycleDetected { node_id: String },
    /// The walk went deeper than the configured limit.
    MaxDepthExceeded { node_id: String, max_depth: usize },
    /// A node failed.
    NodeExecutionFailed { node_id: String, source: NodeError },
    /// The run panicked.
    Panicked { message: String },
    /// Persistence failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlowNotFound { flow_id } => write!(f, "flow not found: {flow_id}"),
            Self::FlowDisabled { flow_id } => write!(f, "flow is disabled: {flow_id}"),
            Self::ExecutionBoundToOtherFlow {
                execution_id,
                bound_to,
            } => write!(
                f,
                "execution {execution_id} already bound to flow {bound_to}"
            ),
            Self::NoTriggerNodes { flow_id } => write!(f, "no trigger nodes found in flow {flow_id}"),
            Self::CycleDetected { node_id } => write!(f, "cycle detected at node {node_id}"),
            Self::MaxDepthExceeded { node_id, max_depth } => {
                write!(f, "max depth {max_depth} exceeded at node {node_id}")
            }
            Self::NodeExecutionFailed { node_id, source } => {
                write!(f, "node {node_id} execution failed: {source}")
            }
            Self::Panicked { message } => write!(f, "flow execution panicked: {message}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NodeExecutionFailed { source, .. } => Some(source),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// The rules or executions could not be loaded.
    Store(StoreError),
    /// A rule's window reaches outside the representable time range.
    WindowOutOfRange { rule_id: RateLimitId },
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "failed to load rate limits: {e}"),
            Self::WindowOutOfRange { rule_id } => {
                write!(f, "rate limit {rule_id} has a window outside the supported time range")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

impl From<StoreError> for RateLimitError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::CycleDetected {
            node_id: "a1".to_string(),
        };
        assert_eq!(err.to_string(), "cycle detected at node a1");

        let err = EngineError::ExecutionBoundToOtherFlow {
            execution_id: ExecutionId::new("x"),
            bound_to: FlowId::new(3),
        };
        assert!(err.to_string().contains("already bound to flow 3"));
    }

    #[test]
    fn node_failure_keeps_source() {
        use std::error::Error as _;

        let err = EngineError::NodeExecutionFailed {
            node_id: "a1".to_string(),
            source: NodeError::Rule(RuleError::failed("boom")),
        };
        assert_eq!(err.to_string(), "node a1 execution failed: boom");
        assert!(err.source().is_some());
    }

    #[test]
    fn store_conflict_is_detected() {
        let err = StoreError::Conflict {
            entity: "execution",
            id: "x".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!StoreError::Backend { reason: "down".to_string() }.is_conflict());
    }
}
