//! Entry point for execute requests.
//!
//! The dispatcher validates the target flow, applies its rate limits and
//! hands the request to the queue manager. Webhook requests are first
//! resolved to the trigger node whose `token` parameter matches.

use crate::error::DispatchError;
use crate::queue::{QueueManager, Submission};
use flowbot_core::{ExecutionId, FlowId, Kv, KvExt};
use flowbot_flows::{
    Execution, Flow, FlowJob, FlowStore, NodeType, RateLimitResult, RateLimiter,
};
use flowbot_integration::{RuleRegistry, TriggerMode};
use std::sync::Arc;
use tracing::{info, warn};

/// Node parameter carrying a webhook trigger's token.
pub const WEBHOOK_TOKEN_PARAM: &str = "token";

/// Validates, rate-limits and submits flow executions.
pub struct FlowDispatcher {
    store: Arc<dyn FlowStore>,
    registry: Arc<dyn RuleRegistry>,
    rate_limiter: RateLimiter,
    queue: Arc<QueueManager>,
}

impl FlowDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn FlowStore>,
        registry: Arc<dyn RuleRegistry>,
        queue: Arc<QueueManager>,
    ) -> Self {
        Self {
            rate_limiter: RateLimiter::new(Arc::clone(&store)),
            store,
            registry,
            queue,
        }
    }

    /// Submits an execution of a flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is missing or disabled, a rate limit is
    /// reached, or the inline fallback run fails.
    pub async fn trigger(
        &self,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<Submission, DispatchError> {
        self.load_enabled_flow(flow_id).await?;
        self.admit_and_submit(flow_id, trigger_type, trigger_id, payload)
            .await
    }

    /// Submits an execution for a webhook call.
    ///
    /// The flow must have a webhook-mode trigger whose `token` parameter
    /// equals `token`. The token doubles as the trigger ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty, the flow is missing or
    /// disabled, no trigger carries the token, a rate limit is reached, or
    /// the inline fallback run fails.
    pub async fn trigger_webhook(
        &self,
        flow_id: FlowId,
        token: &str,
        payload: Kv,
    ) -> Result<Submission, DispatchError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DispatchError::InvalidToken);
        }
        self.load_enabled_flow(flow_id).await?;

        let nodes = self.store.list_nodes(flow_id).await?;
        let node = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Trigger)
            .filter(|n| n.parameters.get_str(WEBHOOK_TOKEN_PARAM) == Some(token))
            .find(|n| {
                self.registry
                    .find_trigger(&n.bot, &n.rule_id)
                    .is_ok_and(|rule| rule.mode() == TriggerMode::Webhook)
            })
            .ok_or(DispatchError::WebhookNotFound { flow_id })?;

        info!(flow_id = %flow_id, node_id = %node.node_id, "webhook received");
        self.admit_and_submit(flow_id, &node.trigger_type(), token, payload)
            .await
    }

    /// Lists a flow's executions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_executions(
        &self,
        flow_id: FlowId,
        limit: usize,
    ) -> Result<Vec<Execution>, DispatchError> {
        Ok(self.store.list_executions(flow_id, limit).await?)
    }

    /// Lists the per-node job records of an execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn execution_jobs(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<FlowJob>, DispatchError> {
        Ok(self.store.list_jobs(execution_id).await?)
    }

    async fn load_enabled_flow(&self, flow_id: FlowId) -> Result<Flow, DispatchError> {
        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(DispatchError::FlowNotFound { flow_id })?;
        if !flow.enabled {
            return Err(DispatchError::FlowDisabled { flow_id });
        }
        Ok(flow)
    }

    async fn admit_and_submit(
        &self,
        flow_id: FlowId,
        trigger_type: &str,
        trigger_id: &str,
        payload: Kv,
    ) -> Result<Submission, DispatchError> {
        match self.rate_limiter.check_rate_limit(flow_id, "").await {
            Ok(RateLimitResult::Exceeded { retry_after, .. }) => {
                info!(flow_id = %flow_id, retry_after_secs = retry_after.num_seconds(), "rate limited");
                return Err(DispatchError::RateLimited { retry_after });
            }
            Ok(RateLimitResult::Allowed { .. }) => {}
            Err(e) => warn!(flow_id = %flow_id, error = %e, "rate limit check failed"),
        }

        Ok(self
            .queue
            .submit(flow_id, trigger_type, trigger_id, payload)
            .await?)
    }
}
