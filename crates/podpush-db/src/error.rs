//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A change was refused by the job's own rules.
    #[error(transparent)]
    Domain(#[from] podpush_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for podpush_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => podpush_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => podpush_core::Error::Conflict(msg),
            DbError::Domain(err) => err,
            other => podpush_core::Error::Internal(other.to_string()),
        }
    }
}
