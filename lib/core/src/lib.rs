//! Core types shared by every flowbot crate.
//!
//! This crate provides the typed identifiers, the JSON key-value map that
//! carries parameters, payloads and variables through an execution, and
//! the `Result` alias used at the process boundary.

pub mod error;
pub mod id;
pub mod kv;

pub use error::Result;
pub use id::{ExecutionId, FlowId, FlowJobId, ParseIdError, QueueJobId, RateLimitId};
pub use kv::{Kv, KvExt, display_value};
