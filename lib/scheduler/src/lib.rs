//! Background execution for flowbot.
//!
//! This crate provides:
//!
//! - **Queue**: a durable job queue and the workers that drain it
//! - **Poller**: periodic polling of poll-mode triggers
//! - **Dispatch**: validated, rate-limited entry point for execute requests
//! - **Retry**: bounded exponential backoff shared by the above

pub mod dispatch;
pub mod error;
pub mod poller;
pub mod queue;
pub mod retry;

#[cfg(test)]
mod testing;

pub use dispatch::{FlowDispatcher, WEBHOOK_TOKEN_PARAM};
pub use error::{DispatchError, QueueError, RetryError};
pub use poller::{POLL_INTERVAL_PARAM, POLL_NEXT_AT_KEY, Poller, PollerConfig, TickReport};
pub use queue::{
    FLOW_EXECUTION_JOB_KIND, FlowExecutionArgs, JobQueue, JobStatus, MemoryJobQueue, QueueConfig,
    QueueJob, QueueManager, Submission, retry_delay,
};
pub use retry::{RetryConfig, retry};
