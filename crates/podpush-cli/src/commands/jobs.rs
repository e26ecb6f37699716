//! Job commands.

use anyhow::{Context, Result, bail};
use podpush_core::{ResourceId, Specification};
use podpush_db::{JobStore, PgJobStore, PgRegistry};
use podpush_github::{SourceCheck, source};
use tracing::info;

use super::{connect, load_config};

pub async fn submit(
    config_path: &str,
    url: &str,
    document: &str,
    skip_source_check: bool,
) -> Result<()> {
    let payload =
        std::fs::read_to_string(document).with_context(|| format!("reading {}", document))?;
    let spec = Specification::from_json(&payload)
        .with_context(|| format!("{} is not a usable specification", document))?;

    if skip_source_check {
        info!(pod = spec.name(), "Skipping source check");
    } else {
        let check = SourceCheck::new(source::DEFAULT_TIMEOUT)?;
        if !check.is_publicly_accessible(spec.source()).await {
            bail!(
                "source of {} {} is not publicly accessible: {:?}",
                spec.name(),
                spec.version(),
                spec.source()
            );
        }
    }

    let config = load_config(config_path)?;
    let pool = connect(&config).await?;

    let registry = PgRegistry::new(pool.clone());
    let pod_version = registry
        .register(spec.name(), spec.version(), url, &payload)
        .await?;
    let job = PgJobStore::new(pool).create(pod_version.id).await?;

    println!(
        "Submitted {} {} as job {}",
        spec.name(),
        spec.version(),
        job.id
    );
    println!("  destination: {}", pod_version.document_path());
    Ok(())
}

pub async fn list(config_path: &str, limit: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let store = PgJobStore::new(connect(&config).await?);

    let jobs = store.list(limit).await?;
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<28}  attempts={}  updated {}",
            job.id,
            format!("{:?}", job.state()),
            job.attempts,
            job.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn show(config_path: &str, id: uuid::Uuid) -> Result<()> {
    let config = load_config(config_path)?;
    let store = PgJobStore::new(connect(&config).await?);
    let id = ResourceId::from_uuid(id);

    let job = store.get(id).await?;
    let logs = store.logs(id).await?;

    println!("Job {}", job.id);
    println!("  state:        {:?}", job.state());
    println!("  attempts:     {}", job.attempts);
    if let Some(number) = job.pull_request_number {
        println!("  pull request: #{}", number);
    }
    if let Some(sha) = &job.merge_commit_sha {
        println!("  merged as:    {}", sha);
    }
    println!();
    for log in logs {
        println!(
            "{}  {}",
            log.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            log.message
        );
    }
    Ok(())
}
