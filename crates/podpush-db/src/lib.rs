//! Database layer for the pod submission pipeline.
//!
//! Provides the job store and registry traits' PostgreSQL implementations,
//! plus in-memory equivalents with the same locking semantics.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use podpush_config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};

/// Create a new database connection pool.
///
/// Statement logging stays off unless configured: the claim scan runs on
/// every dispatcher pass and would drown everything else.
pub async fn create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    let mut options: PgConnectOptions = config.url.parse()?;
    if !config.log_statements {
        options = options.disable_statement_logging();
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Round-trip to the database, for readiness checks.
pub async fn ping(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
