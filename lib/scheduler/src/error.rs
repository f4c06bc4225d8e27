//! Error types for the scheduler crate.
//!
//! - `RetryError`: a retried operation gave up or was cancelled
//! - `QueueError`: enqueueing or processing a queued execution failed
//! - `DispatchError`: an execute request was rejected or failed

use chrono::TimeDelta;
use flowbot_core::FlowId;
use flowbot_flows::{EngineError, StoreError};
use std::fmt;

/// Errors from [`retry`](crate::retry::retry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The cancellation token fired while waiting between attempts.
    Cancelled,
    /// Every attempt failed; carries the last error.
    MaxAttemptsReached { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// Returns the last error, if attempts were exhausted.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::MaxAttemptsReached { last_error, .. } => Some(last_error),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "retry cancelled"),
            Self::MaxAttemptsReached { last_error, .. } => {
                write!(f, "max retry attempts reached: {last_error}")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cancelled => None,
            Self::MaxAttemptsReached { last_error, .. } => Some(last_error),
        }
    }
}

/// Errors from the queue manager and job queue backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No queue backend is configured.
    Disabled,
    /// The flow does not exist.
    FlowNotFound { flow_id: FlowId },
    /// The flow exists but is disabled.
    FlowDisabled { flow_id: FlowId },
    /// The queue backend failed.
    Backend { reason: String },
    /// The flow store failed.
    Store(StoreError),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "flow queue is disabled"),
            Self::FlowNotFound { flow_id } => write!(f, "flow not found: {flow_id}"),
            Self::FlowDisabled { flow_id } => write!(f, "flow is disabled: {flow_id}"),
            Self::Backend { reason } => write!(f, "flow queue error: {reason}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The flow does not exist.
    FlowNotFound { flow_id: FlowId },
    /// The flow exists but is disabled.
    FlowDisabled { flow_id: FlowId },
    /// The webhook token is empty.
    InvalidToken,
    /// No webhook trigger of the flow carries the token.
    WebhookNotFound { flow_id: FlowId },
    /// A rate limit is reached.
    RateLimited { retry_after: TimeDelta },
    /// Synchronous execution failed.
    Engine(EngineError),
    /// The flow store failed.
    Store(StoreError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlowNotFound { flow_id } => write!(f, "flow not found: {flow_id}"),
            Self::FlowDisabled { flow_id } => write!(f, "flow is disabled: {flow_id}"),
            Self::InvalidToken => write!(f, "invalid webhook token"),
            Self::WebhookNotFound { flow_id } => {
                write!(f, "webhook trigger not found for flow {flow_id}")
            }
            Self::RateLimited { retry_after } => write!(
                f,
                "rate limit exceeded, retry after {}s",
                retry_after.num_seconds()
            ),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<EngineError> for DispatchError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
