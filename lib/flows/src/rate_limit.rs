//! Rate limiting for flow executions.
//!
//! Rules are persisted per flow (and optionally per node). A rule allows at
//! most `limit_value` executions of the flow within a sliding window ending
//! now; all applicable rules must allow for the check to pass.

use crate::error::RateLimitError;
use crate::model::RateLimit;
use crate::store::FlowStore;
use chrono::{DateTime, TimeDelta, Utc};
use flowbot_core::FlowId;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many recent executions are scanned per rule.
pub const EXECUTION_SCAN_LIMIT: usize = 1000;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Execution is allowed.
    Allowed {
        /// Executions left in the tightest window, or `None` when no rule applies.
        remaining: Option<u32>,
    },
    /// A rule's limit is reached.
    Exceeded {
        /// How long until the window has room again.
        retry_after: TimeDelta,
        /// When the window has room again.
        resets_at: DateTime<Utc>,
    },
}

impl RateLimitResult {
    /// Returns true if execution is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns how long to wait before retrying (zero if allowed).
    #[must_use]
    pub fn retry_after(&self) -> TimeDelta {
        match self {
            Self::Allowed { .. } => TimeDelta::zero(),
            Self::Exceeded { retry_after, .. } => *retry_after,
        }
    }
}

/// Checks flow executions against persisted rate-limit rules.
pub struct RateLimiter {
    store: Arc<dyn FlowStore>,
}

impl RateLimiter {
    /// Creates a rate limiter over a store.
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Checks whether a flow may execute now.
    ///
    /// A rule that cannot be evaluated is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be loaded.
    pub async fn check_rate_limit(&self, flow_id: FlowId, node_id: &str) -> Result<RateLimitResult, RateLimitError> {
        let rules = self.store.list_rate_limits(flow_id, node_id).await?;
        let mut remaining: Option<u32> = None;

        for rule in &rules {
            match self.check_rule(flow_id, rule).await {
                Ok(RateLimitResult::Allowed { remaining: Some(left) }) => {
                    remaining = Some(remaining.map_or(left, |r| r.min(left)));
                }
                Ok(RateLimitResult::Allowed { remaining: None }) => {}
                Ok(exceeded) => {
                    debug!(flow_id = %flow_id, rule_id = %rule.id, "rate limit exceeded");
                    return Ok(exceeded);
                }
                Err(e) => {
                    warn!(flow_id = %flow_id, rule_id = %rule.id, error = %e, "failed to check rate limit");
                }
            }
        }

        Ok(RateLimitResult::Allowed { remaining })
    }

    async fn check_rule(&self, flow_id: FlowId, rule: &RateLimit) -> Result<RateLimitResult, RateLimitError> {
        let out_of_range = || RateLimitError::WindowOutOfRange { rule_id: rule.id };
        let now = Utc::now();
        let window = rule.window();
        let window_start = now.checked_sub_signed(window).ok_or_else(out_of_range)?;
        let counted_flow = rule.flow_id.unwrap_or(flow_id);

        let executions = self
            .store
            .list_executions(counted_flow, EXECUTION_SCAN_LIMIT)
            .await?;
        let in_window: Vec<DateTime<Utc>> = executions
            .iter()
            .map(|e| e.created_at)
            .take_while(|created| *created >= window_start)
            .collect();

        let count = u32::try_from(in_window.len()).unwrap_or(u32::MAX);
        if count < rule.limit_value {
            return Ok(RateLimitResult::Allowed {
                remaining: Some(rule.limit_value - count),
            });
        }

        // Room frees up once the newest `limit_value` executions are the only
        // ones left in the window.
        let resets_at = match rule.limit_value.checked_sub(1) {
            Some(i) => in_window[i as usize].checked_add_signed(window),
            None => now.checked_add_signed(window),
        }
        .ok_or_else(out_of_range)?;
        Ok(RateLimitResult::Exceeded {
            retry_after: (resets_at - now).max(TimeDelta::zero()),
            resets_at,
        })
    }
}
