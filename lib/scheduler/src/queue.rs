//! Durable execution queue.
//!
//! Execute requests are pushed as [`QueueJob`]s and claimed by a small pool
//! of workers, each of which runs the flow through the engine under the
//! job's pre-generated execution ID. Failed jobs are retried with
//! exponential backoff until `max_attempts` is reached.

use crate::error::{QueueError, RetryError};
use crate::retry::{RetryConfig, retry};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use flowbot_core::{ExecutionId, FlowId, Kv, QueueJobId};
use flowbot_flows::{Engine, EngineError, FlowStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind tag of flow execution jobs.
pub const FLOW_EXECUTION_JOB_KIND: &str = "flow_execution";

/// Status of a queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at`.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Executed successfully.
    Completed,
    /// Gave up after `max_attempts`.
    Failed,
}

impl JobStatus {
    /// Returns the status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a flow execution job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionArgs {
    pub flow_id: FlowId,
    pub trigger_type: String,
    pub trigger_id: String,
    #[serde(default)]
    pub payload: Kv,
}

/// A queued flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    /// Assigned by the queue on push.
    pub id: QueueJobId,
    pub kind: String,
    /// Execution ID the worker runs the flow under.
    pub execution_id: ExecutionId,
    pub args: FlowExecutionArgs,
    pub status: JobStatus,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time a worker may claim the job.
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueJob {
    /// Creates a pending job that is due now.
    #[must_use]
    pub fn new(execution_id: ExecutionId, args: FlowExecutionArgs) -> Self {
        let now = Utc::now();
        Self {
            id: QueueJobId::default(),
            kind: FLOW_EXECUTION_JOB_KIND.to_string(),
            execution_id,
            args,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: QueueConfig::default().max_attempts,
            run_at: now,
            locked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Backoff before the next attempt of a job that has failed `attempts` times.
///
/// Doubles per failure from 2s and stops growing after the sixth.
#[must_use]
pub fn retry_delay(attempts: u32) -> TimeDelta {
    TimeDelta::seconds(1_i64 << attempts.min(6))
}

/// A durable job queue backend.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Inserts a job and returns its assigned ID.
    async fn push(&self, job: QueueJob) -> Result<QueueJobId, QueueError>;

    /// Atomically claims the oldest pending job due at `now`, marking it running.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueJob>, QueueError>;

    /// Marks a job completed.
    async fn complete(&self, id: QueueJobId) -> Result<(), QueueError>;

    /// Marks a job permanently failed.
    async fn fail(&self, id: QueueJobId, attempts: u32, error: &str) -> Result<(), QueueError>;

    /// Returns a job to pending, due at `run_at`.
    async fn reschedule(
        &self,
        id: QueueJobId,
        attempts: u32,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Looks up a job.
    async fn get(&self, id: QueueJobId) -> Result<Option<QueueJob>, QueueError>;
}

/// In-process [`JobQueue`].
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    inner: Mutex<MemoryJobs>,
}

#[derive(Debug, Default)]
struct MemoryJobs {
    next_id: i64,
    jobs: Vec<QueueJob>,
}

impl MemoryJobs {
    fn job_mut(&mut self, id: QueueJobId) -> Result<&mut QueueJob, QueueError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QueueError::Backend {
                reason: format!("queue job not found: {id}"),
            })
    }
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, mut job: QueueJob) -> Result<QueueJobId, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        job.id = QueueJobId::new(inner.next_id);
        let id = job.id;
        inner.jobs.push(job);
        Ok(id)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueJob>, QueueError> {
        let mut inner = self.inner.lock().await;
        // Jobs are stored in id order.
        let Some(job) = inner
            .jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending && j.run_at <= now)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.locked_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: QueueJobId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, id: QueueJobId, attempts: u32, error: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Failed;
        job.attempts = attempts;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule(
        &self,
        id: QueueJobId,
        attempts: u32,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Pending;
        job.attempts = attempts;
        job.last_error = Some(error.to_string());
        job.run_at = run_at;
        job.locked_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: QueueJobId) -> Result<Option<QueueJob>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.iter().find(|j| j.id == id).cloned())
    }
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_idle_backoff_ms() -> u64 {
    500
}

fn default_max_idle_backoff_ms() -> u64 {
    5_000
}

fn default_claim_error_backoff_ms() -> u64 {
    1_000
}

/// Queue worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per job before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First wait after finding the queue empty.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Cap on the idle wait, which doubles while the queue stays empty.
    #[serde(default = "default_max_idle_backoff_ms")]
    pub max_idle_backoff_ms: u64,
    /// Wait after a failed claim.
    #[serde(default = "default_claim_error_backoff_ms")]
    pub claim_error_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            idle_backoff_ms: default_idle_backoff_ms(),
            max_idle_backoff_ms: default_max_idle_backoff_ms(),
            claim_error_backoff_ms: default_claim_error_backoff_ms(),
        }
    }
}

/// Outcome of [`QueueManager::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The execution was queued for a worker.
    Queued { execution_id: ExecutionId },
    /// The queue was unavailable and the flow ran inline.
    Executed { execution_id: ExecutionId },
}

impl Submission {
    /// The execution ID, whichever path was taken.
    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            Self::Queued { execution_id } | Self::Executed { execution_id } => execution_id,
        }
    }

    /// Returns true if the execution was queued.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Owns the queue backend and its workers.
pub struct QueueManager {
    queue: Option<Arc<dyn JobQueue>>,
    store: Arc<dyn FlowStore>,
    engine: Arc<Engine>,
    config: QueueConfig,
    retry: RetryConfig,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueManager {
    /// Creates a manager. Without a queue backend every submission runs inline.
    #[must_use]
    pub fn new(
        store: Arc<dyn FlowStore>,
        engine: Arc<Engine>,
        queue: Option<Arc<dyn JobQueue>>,
    ) -> Self {
        Self {
            queue,
            store,
            engine,
            config: QueueConfig::default(),
            retry: RetryConfig::default(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the worker configuration.
    #[must_use]
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the retry policy used for pushes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if a queue backend is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    /// Queues a flow execution and returns its pre-generated execution ID.
    ///
    /// # Errors
    ///
    /// Returns an error if no queue is configured, the flow is missing or
    /// disabled, or the push keeps failing.
    pub async fn enqueue_flow_execution(
        &self,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<ExecutionId, QueueError> {
        let Some(queue) = &self.queue else {
            return Err(QueueError::Disabled);
        };

        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(QueueError::FlowNotFound { flow_id })?;
        if !flow.enabled {
            return Err(QueueError::FlowDisabled { flow_id });
        }

        let execution_id = ExecutionId::generate();
        let job = QueueJob::new(
            execution_id.clone(),
            FlowExecutionArgs {
                flow_id,
                trigger_type: trigger_type.to_string(),
                trigger_id: trigger_id.to_string(),
                payload,
            },
        )
        .with_max_attempts(self.config.max_attempts);

        let job_id = retry(&self.retry, &self.shutdown, || queue.push(job.clone()))
            .await
            .map_err(|e| match e {
                RetryError::MaxAttemptsReached { last_error, .. } => last_error,
                RetryError::Cancelled => QueueError::Backend {
                    reason: "queue is shutting down".to_string(),
                },
            })?;

        info!(
            flow_id = %flow_id,
            execution_id = %execution_id,
            job_id = %job_id,
            "flow execution queued"
        );
        Ok(execution_id)
    }

    /// Queues a flow execution, running it inline if queueing fails.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the inline run fails.
    pub async fn submit(
        &self,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<Submission, EngineError> {
        match self
            .enqueue_flow_execution(flow_id, trigger_type, trigger_id, payload.clone())
            .await
        {
            Ok(execution_id) => return Ok(Submission::Queued { execution_id }),
            Err(QueueError::Disabled) => {}
            Err(e) => {
                warn!(flow_id = %flow_id, error = %e, "enqueue failed, executing inline");
            }
        }

        let execution_id = self
            .engine
            .execute_flow(flow_id, trigger_type, trigger_id, payload)
            .await?;
        Ok(Submission::Executed { execution_id })
    }

    /// Claims and runs one due job.
    ///
    /// Returns `false` if nothing was due.
    ///
    /// # Errors
    ///
    /// Returns an error if no queue is configured or the backend fails.
    /// Execution failures are recorded on the job, not returned.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(queue) = &self.queue else {
            return Err(QueueError::Disabled);
        };
        let Some(job) = queue.claim_next(Utc::now()).await? else {
            return Ok(false);
        };

        let args = &job.args;
        debug!(job_id = %job.id, execution_id = %job.execution_id, "processing queue job");
        let result = self
            .engine
            .execute_flow_with_execution_id(
                args.flow_id,
                Some(job.execution_id.clone()),
                &args.trigger_type,
                &args.trigger_id,
                args.payload.clone(),
            )
            .await;

        match result {
            Ok(_) => queue.complete(job.id).await?,
            Err(e) => {
                let attempts = job.attempts + 1;
                let error = e.to_string();
                if attempts >= job.max_attempts {
                    warn!(
                        job_id = %job.id,
                        execution_id = %job.execution_id,
                        attempts,
                        error = %error,
                        "queue job failed permanently"
                    );
                    queue.fail(job.id, attempts, &error).await?;
                } else {
                    let run_at = Utc::now() + retry_delay(attempts);
                    warn!(
                        job_id = %job.id,
                        execution_id = %job.execution_id,
                        attempts,
                        run_at = %run_at,
                        error = %error,
                        "queue job failed, rescheduled"
                    );
                    queue.reschedule(job.id, attempts, &error, run_at).await?;
                }
            }
        }
        Ok(true)
    }

    /// Spawns the worker tasks. Does nothing without a queue backend, when
    /// workers are already running, or after [`stop`](Self::stop).
    pub async fn start(self: &Arc<Self>) {
        if self.queue.is_none() {
            debug!("flow queue disabled, no workers started");
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("flow queue already stopped");
            return;
        }
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        for worker in 0..self.config.workers.max(1) {
            let manager = Arc::clone(self);
            workers.push(tokio::spawn(async move { manager.work(worker).await }));
        }
        info!(workers = workers.len(), "flow queue workers started");
    }

    /// Signals the workers to stop and waits for them.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "flow queue worker ended abnormally");
            }
        }
        info!("flow queue workers stopped");
    }

    async fn work(&self, worker: usize) {
        let initial_idle = Duration::from_millis(self.config.idle_backoff_ms);
        let max_idle = Duration::from_millis(self.config.max_idle_backoff_ms);
        let mut idle = initial_idle;

        while !self.shutdown.is_cancelled() {
            let wait = match self.process_next().await {
                Ok(true) => {
                    idle = initial_idle;
                    continue;
                }
                Ok(false) => {
                    let wait = idle;
                    idle = (idle * 2).min(max_idle);
                    wait
                }
                Err(e) => {
                    warn!(worker, error = %e, "failed to process queue job");
                    Duration::from_millis(self.config.claim_error_backoff_ms)
                }
            };

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }
        debug!(worker, "flow queue worker exiting");
    }
}
