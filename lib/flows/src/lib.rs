//! Flow execution core for flowbot.
//!
//! This crate provides:
//!
//! - **Model**: flows, nodes, edges, executions, jobs and rate-limit rules
//! - **Store**: the persistence contract and an in-process implementation
//! - **Graph**: a petgraph index over a flow's nodes and edges
//! - **Engine**: trigger selection, depth-first walk and per-node execution
//! - **Rate limiter**: sliding-window limits over recent executions

pub mod condition;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod rate_limit;
pub mod store;
pub mod template;

pub use condition::{evaluate, evaluate_conditions};
pub use engine::{DEFAULT_MAX_DEPTH, DEFAULT_NODE_TIMEOUT_SECS, Engine, EngineConfig, normalize_trigger_type};
pub use error::{EngineError, NodeError, RateLimitError, StoreError, TransitionError};
pub use graph::FlowGraph;
pub use model::{
    Condition, Execution, ExecutionState, Flow, FlowEdge, FlowJob, FlowNode, JobState, NodeType,
    RateLimit, TRIGGER_TYPE_SEPARATOR, WindowUnit,
};
pub use rate_limit::{RateLimitResult, RateLimiter};
pub use store::{FlowStore, MemoryStore};
pub use template::{SimpleTemplateRenderer, TemplateRenderer, render_params, render_value};
