//! Poll-mode trigger driver.
//!
//! On every tick the poller walks the trigger nodes of all enabled flows,
//! polls the ones whose rule is in poll mode and due, persists the returned
//! cursor state on the node, and submits one execution per event.
//!
//! Node variables used:
//! - the rule's own cursor state
//! - `_poll_next_at`: unix seconds before which the node is not polled

use crate::queue::QueueManager;
use crate::retry::{RetryConfig, retry};
use chrono::{DateTime, TimeDelta, Utc};
use flowbot_core::{Kv, KvExt, display_value};
use flowbot_flows::{Flow, FlowNode, FlowStore, NodeType};
use flowbot_integration::{RuleContext, RuleRegistry, TriggerMode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Node variable holding the next due time.
pub const POLL_NEXT_AT_KEY: &str = "_poll_next_at";

/// Node parameter overriding the poll interval.
pub const POLL_INTERVAL_PARAM: &str = "interval_seconds";

fn default_interval_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> i64 {
    60
}

/// Poller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds between polls of a node without `interval_seconds`.
    #[serde(default = "default_poll_interval_secs")]
    pub default_poll_interval_secs: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            default_poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Nodes whose rule was polled.
    pub polled: usize,
    /// Events submitted for execution.
    pub submitted: usize,
    /// Polls or submissions that failed.
    pub failed: usize,
}

/// Drives poll-mode triggers.
pub struct Poller {
    store: Arc<dyn FlowStore>,
    registry: Arc<dyn RuleRegistry>,
    queue: Arc<QueueManager>,
    config: PollerConfig,
    retry: RetryConfig,
    poll_timeout: Duration,
}

impl Poller {
    /// Creates a poller with default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn FlowStore>,
        registry: Arc<dyn RuleRegistry>,
        queue: Arc<QueueManager>,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            config: PollerConfig::default(),
            retry: RetryConfig::default(),
            poll_timeout: flowbot_integration::DEFAULT_RULE_TIMEOUT,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the time budget of a single poll.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Spawns the tick loop. The first tick runs one interval after start.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "poller started");

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.tick(&cancel).await;
                        if report != TickReport::default() {
                            debug!(
                                polled = report.polled,
                                submitted = report.submitted,
                                failed = report.failed,
                                "poll tick finished"
                            );
                        }
                    }
                }
            }
            info!("poller stopped");
        })
    }

    /// Polls every due poll-mode trigger once.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();
        let flows = match self.store.list_flows("", "").await {
            Ok(flows) => flows,
            Err(e) => {
                warn!(error = %e, "poller failed to list flows");
                return report;
            }
        };

        for flow in flows.iter().filter(|f| f.enabled) {
            if cancel.is_cancelled() {
                break;
            }
            let nodes = match self.store.list_nodes(flow.id).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(flow_id = %flow.id, error = %e, "poller failed to list nodes");
                    continue;
                }
            };
            for node in nodes.into_iter().filter(|n| n.node_type == NodeType::Trigger) {
                self.poll_node(flow, node, cancel, &mut report).await;
            }
        }
        report
    }

    async fn poll_node(
        &self,
        flow: &Flow,
        mut node: FlowNode,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) {
        let Ok(rule) = self.registry.find_trigger(&node.bot, &node.rule_id) else {
            return;
        };
        if rule.mode() != TriggerMode::Poll {
            return;
        }

        let now = Utc::now();
        let interval = node
            .parameters
            .get_i64(POLL_INTERVAL_PARAM)
            .filter(|secs| *secs > 0)
            .unwrap_or(self.config.default_poll_interval_secs);
        let next_at = node.variables.get_i64(POLL_NEXT_AT_KEY).unwrap_or(0);
        if next_at > now.timestamp() {
            return;
        }

        report.polled += 1;
        let ctx = RuleContext::new(flow.id, flow.uid.clone(), flow.topic.clone())
            .with_timeout(self.poll_timeout);
        let outcome = tokio::time::timeout(
            self.poll_timeout,
            rule.poll(&ctx, &node.parameters, &node.variables),
        )
        .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(flow_id = %flow.id, node_id = %node.node_id, error = %e, "poll failed");
                report.failed += 1;
                schedule_next(&mut node.variables, now, interval);
                self.save_state(&node, cancel).await;
                return;
            }
            Err(_) => {
                warn!(flow_id = %flow.id, node_id = %node.node_id, "poll timed out");
                report.failed += 1;
                schedule_next(&mut node.variables, now, interval);
                self.save_state(&node, cancel).await;
                return;
            }
        };

        let mut state = result.state.unwrap_or_else(|| node.variables.clone());
        schedule_next(&mut state, now, interval);
        node.variables = state;
        self.save_state(&node, cancel).await;

        let trigger_type = node.trigger_type();
        for event in result.events {
            let trigger_id = event.get("id").map(display_value).unwrap_or_default();
            match self
                .queue
                .submit(flow.id, &trigger_type, &trigger_id, event)
                .await
            {
                Ok(submission) => {
                    report.submitted += 1;
                    debug!(
                        flow_id = %flow.id,
                        node_id = %node.node_id,
                        execution_id = %submission.execution_id(),
                        "poll event submitted"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(flow_id = %flow.id, node_id = %node.node_id, error = %e, "poll event failed");
                }
            }
        }
    }

    async fn save_state(&self, node: &FlowNode, cancel: &CancellationToken) {
        if let Err(e) = retry(&self.retry, cancel, || self.store.update_node(node)).await {
            warn!(
                flow_id = %node.flow_id,
                node_id = %node.node_id,
                error = %e,
                "failed to save poll state"
            );
        }
    }
}

fn schedule_next(variables: &mut Kv, now: DateTime<Utc>, interval_secs: i64) {
    let next = now + TimeDelta::seconds(interval_secs);
    variables.insert(POLL_NEXT_AT_KEY.to_string(), json!(next.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobQueue, MemoryJobQueue};
    use crate::testing::{Fixture, fixture};
    use flowbot_core::QueueJobId;
    use flowbot_flows::ExecutionState;

    fn poller(f: &Fixture, queue: Option<Arc<dyn JobQueue>>) -> Poller {
        let manager = Arc::new(QueueManager::new(f.store.clone(), f.engine.clone(), queue));
        Poller::new(f.store.clone(), f.registry.clone(), manager)
    }

    #[tokio::test]
    async fn polls_due_triggers_and_queues_events() {
        let f = fixture();
        let flow_id = f
            .seed(
                vec![
                    FlowNode::trigger("p", "dev", "counter"),
                    FlowNode::trigger("m", "dev", "go"),
                ],
                &[],
            )
            .await;
        let queue = Arc::new(MemoryJobQueue::new());
        let poller = poller(&f, Some(queue.clone() as Arc<dyn JobQueue>));

        let before = Utc::now().timestamp();
        let report = poller.tick(&CancellationToken::new()).await;
        assert_eq!(
            report,
            TickReport {
                polled: 1,
                submitted: 2,
                failed: 0
            }
        );

        let first = queue.get(QueueJobId::new(1)).await.unwrap().unwrap();
        let second = queue.get(QueueJobId::new(2)).await.unwrap().unwrap();
        assert_eq!(first.args.trigger_type, "dev|counter");
        assert_eq!(first.args.trigger_id, "1");
        assert_eq!(second.args.trigger_id, "e2");

        let node = f.node(flow_id, "p").await;
        assert_eq!(node.variables.get_i64("cursor"), Some(2));
        let next_at = node.variables.get_i64(POLL_NEXT_AT_KEY).unwrap();
        assert!(next_at >= before + 60 && next_at <= Utc::now().timestamp() + 60);

        // Not due again until the interval passes.
        let report = poller.tick(&CancellationToken::new()).await;
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn interval_parameter_overrides_default() {
        let f = fixture();
        let flow_id = f
            .seed(
                vec![FlowNode::trigger("p", "dev", "counter").with_parameters(
                    json!({"interval_seconds": 5}).as_object().cloned().unwrap(),
                )],
                &[],
            )
            .await;
        let poller = poller(&f, Some(Arc::new(MemoryJobQueue::new()) as Arc<dyn JobQueue>));
        let before = Utc::now().timestamp();
        poller.tick(&CancellationToken::new()).await;

        let next_at = f
            .node(flow_id, "p")
            .await
            .variables
            .get_i64(POLL_NEXT_AT_KEY)
            .unwrap();
        assert!(next_at >= before + 5 && next_at < before + 60);
    }

    #[tokio::test]
    async fn poll_error_still_schedules_next_poll() {
        let f = fixture();
        let flow_id = f.seed(vec![FlowNode::trigger("p", "dev", "broken")], &[]).await;
        let poller = poller(&f, Some(Arc::new(MemoryJobQueue::new()) as Arc<dyn JobQueue>));

        let report = poller.tick(&CancellationToken::new()).await;
        assert_eq!(report.polled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.submitted, 0);
        let node = f.node(flow_id, "p").await;
        assert!(node.variables.get_i64(POLL_NEXT_AT_KEY).unwrap() > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn disabled_flows_are_skipped() {
        let f = fixture();
        let flow_id = f.seed(vec![FlowNode::trigger("p", "dev", "counter")], &[]).await;
        f.disable(flow_id).await;
        let poller = poller(&f, Some(Arc::new(MemoryJobQueue::new()) as Arc<dyn JobQueue>));

        let report = poller.tick(&CancellationToken::new()).await;
        assert_eq!(report, TickReport::default());
        assert!(f.node(flow_id, "p").await.variables.is_empty());
    }

    #[tokio::test]
    async fn events_run_inline_without_queue() {
        let f = fixture();
        let flow_id = f
            .seed(
                vec![
                    FlowNode::trigger("p", "dev", "counter"),
                    FlowNode::action("a", "dev", "ok"),
                ],
                &[("p", "a")],
            )
            .await;
        let poller = poller(&f, None);

        let report = poller.tick(&CancellationToken::new()).await;
        assert_eq!(report.submitted, 2);
        let executions = f.store.list_executions(flow_id, 10).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert!(
            executions
                .iter()
                .all(|e| e.state == ExecutionState::Succeeded)
        );
    }
}
