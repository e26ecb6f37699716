//! podpush API server.
//!
//! Serves the HTTP API and, unless disabled, runs a dispatcher worker in the
//! same process.

use anyhow::Context;
use podpush_api::{AppState, routes};
use podpush_db::{PgJobStore, PgRegistry, create_pool, run_migrations};
use podpush_github::GitHubClient;
use podpush_scheduler::{Dispatcher, SubmissionPipeline, Worker};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("PODPUSH_CONFIG").unwrap_or_else(|_| "podpush.kdl".to_string());
    let config = podpush_config::load(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    config.validate()?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let store = PgJobStore::new(pool.clone());
    let registry = Arc::new(PgRegistry::new(pool.clone()));

    let (stop, shutdown) = watch::channel(false);
    let worker = if config.server.run_worker {
        let hosting = Arc::new(GitHubClient::new(config.github.clone())?);
        let pipeline = SubmissionPipeline::new(hosting, registry.clone(), config.pipeline.clone());
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), pipeline));
        let worker = Worker::new("server", dispatcher, config.pipeline.poll_interval);
        Some(tokio::spawn(async move { worker.run(shutdown).await }))
    } else {
        None
    };

    let state = AppState::new(store, registry, &config).with_pool(pool);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    let _ = stop.send(true);
    if let Some(worker) = worker {
        worker.await?;
    }

    Ok(())
}
