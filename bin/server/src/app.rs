//! Process wiring: store, registry, engine, queue, poller and dispatcher.

use crate::config::AppConfig;
use crate::dev::builtin_registry;
use crate::error::SeedError;
use crate::seed::SeedFile;
use flowbot_core::FlowId;
use flowbot_flows::{Engine, FlowStore, MemoryStore};
use flowbot_integration::{IntegrationRegistry, RuleRegistry};
use flowbot_scheduler::{FlowDispatcher, JobQueue, MemoryJobQueue, Poller, QueueManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The assembled daemon.
pub struct App {
    config: AppConfig,
    store: Arc<dyn FlowStore>,
    queue: Arc<QueueManager>,
    poller: Arc<Poller>,
    dispatcher: Arc<FlowDispatcher>,
}

impl App {
    /// Wires every component over an in-process store and the built-in
    /// integrations.
    #[must_use]
    pub fn build(config: AppConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryStore::new()), builtin_registry())
    }

    /// Wires every component over the given store and registry.
    #[must_use]
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn FlowStore>,
        registry: IntegrationRegistry,
    ) -> Self {
        info!(integrations = ?registry.names(), "integrations registered");
        let registry: Arc<dyn RuleRegistry> = Arc::new(registry);
        let engine = Arc::new(
            Engine::new(Arc::clone(&store), Arc::clone(&registry)).with_config(config.engine.clone()),
        );

        let backend: Option<Arc<dyn JobQueue>> = if config.queue_enabled {
            Some(Arc::new(MemoryJobQueue::new()))
        } else {
            None
        };
        let queue = Arc::new(
            QueueManager::new(Arc::clone(&store), engine.clone(), backend)
                .with_config(config.queue.clone()),
        );
        let poller = Arc::new(
            Poller::new(Arc::clone(&store), Arc::clone(&registry), queue.clone())
                .with_config(config.poller.clone())
                .with_poll_timeout(config.engine.node_timeout()),
        );
        let dispatcher = Arc::new(FlowDispatcher::new(
            Arc::clone(&store),
            registry,
            queue.clone(),
        ));

        Self {
            config,
            store,
            queue,
            poller,
            dispatcher,
        }
    }

    /// The execute-request entry point.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<FlowDispatcher> {
        self.dispatcher.clone()
    }

    /// Loads the configured seed file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or applied.
    pub async fn seed(&self) -> Result<Vec<FlowId>, SeedError> {
        let Some(path) = &self.config.seed_file else {
            return Ok(Vec::new());
        };
        let ids = SeedFile::load(path)?.apply(self.store.as_ref()).await?;
        info!(path = %path.display(), flows = ids.len(), "seed file loaded");
        Ok(ids)
    }

    /// Runs the queue workers and the poller until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        self.queue.start().await;
        let poller = self
            .config
            .poller_enabled
            .then(|| self.poller.clone().start(shutdown.child_token()));

        info!(
            queue_enabled = self.queue.is_enabled(),
            poller_enabled = poller.is_some(),
            "flowbot started"
        );
        shutdown.cancelled().await;
        info!("shutting down");

        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                warn!(error = %e, "poller ended abnormally");
            }
        }
        self.queue.stop().await;
    }
}
