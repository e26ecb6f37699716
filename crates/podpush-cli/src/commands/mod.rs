//! CLI command implementations.

pub mod jobs;
pub mod worker;

use anyhow::{Context, Result};
use podpush_config::SystemConfig;
use podpush_db::{create_pool, run_migrations};
use sqlx::PgPool;

pub(crate) fn load_config(path: &str) -> Result<SystemConfig> {
    let config = podpush_config::load(path).with_context(|| format!("loading {}", path))?;
    Ok(config)
}

pub(crate) async fn connect(config: &SystemConfig) -> Result<PgPool> {
    let pool = create_pool(&config.database)
        .await
        .context("connecting to database")?;
    Ok(pool)
}

pub async fn migrate(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = connect(&config).await?;
    run_migrations(&pool).await?;
    println!("Migrations applied");
    Ok(())
}

pub fn validate(config_path: &str) -> Result<()> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid");
            println!("  repository:    {}", config.github.repository);
            println!("  base branch:   {}", config.github.base_branch);
            println!("  retry ceiling: {}", config.pipeline.retry_ceiling);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
