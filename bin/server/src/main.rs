use flowbot_server::{app::App, config::AppConfig, error::StartupError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> flowbot_core::Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(
        workers = config.queue.workers,
        poll_interval_secs = config.poller.interval_secs,
        "Loaded configuration"
    );

    let app = App::build(config);
    app.seed().await.map_err(|e| StartupError::Seed {
        details: e.to_string(),
    })?;

    // Cancel on ctrl-c
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let watcher = tokio::spawn(async move {
        let result = tokio::signal::ctrl_c().await;
        signal.cancel();
        result
    });

    app.run(shutdown).await;

    match watcher.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StartupError::Signal {
            details: e.to_string(),
        }
        .into()),
        Err(e) => Err(StartupError::Signal {
            details: e.to_string(),
        }
        .into()),
    }
}
