//! Dispatcher commands.

use anyhow::Result;
use podpush_config::SystemConfig;
use podpush_db::{PgJobStore, PgRegistry};
use podpush_github::GitHubClient;
use podpush_scheduler::{Dispatcher, SubmissionPipeline, Worker};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::{connect, load_config};

async fn dispatcher(config: &SystemConfig) -> Result<Dispatcher<PgJobStore>> {
    config.validate()?;
    let pool = connect(config).await?;
    let hosting = Arc::new(GitHubClient::new(config.github.clone())?);
    let registry = Arc::new(PgRegistry::new(pool.clone()));
    let pipeline = SubmissionPipeline::new(hosting, registry, config.pipeline.clone());
    Ok(Dispatcher::new(PgJobStore::new(pool), pipeline))
}

pub async fn perform(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let dispatcher = dispatcher(&config).await?;

    match dispatcher.perform_task_outcome().await? {
        Some(outcome) => println!("{:?}", outcome),
        None => println!("No runnable job"),
    }
    Ok(())
}

pub async fn run(config_path: &str, id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let dispatcher = Arc::new(dispatcher(&config).await?);
    let worker = Worker::new(id, dispatcher, config.pipeline.poll_interval);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupted, finishing current pass");
        let _ = stop.send(true);
    });

    worker.run(shutdown).await;
    Ok(())
}
