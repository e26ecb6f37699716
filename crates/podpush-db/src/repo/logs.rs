//! Append-only log messages attached to submission jobs.

use chrono::{DateTime, Utc};
use podpush_core::{LogMessage, ResourceId};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::DbResult;

/// A log message record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogRecord {
    pub id: uuid::Uuid,
    pub submission_job_id: uuid::Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<LogRecord> for LogMessage {
    fn from(record: LogRecord) -> Self {
        Self {
            id: record.id.into(),
            job_id: record.submission_job_id.into(),
            message: record.message,
            created_at: record.created_at,
        }
    }
}

/// Append a message for `job_id` on `conn`, joining whatever transaction it
/// is in.
pub(crate) async fn append(
    conn: &mut PgConnection,
    job_id: ResourceId,
    message: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO log_messages (id, submission_job_id, message, created_at)
        VALUES ($1, $2, $3, clock_timestamp())
        "#,
    )
    .bind(uuid::Uuid::now_v7())
    .bind(job_id.as_uuid())
    .bind(message)
    .execute(conn)
    .await?;
    Ok(())
}

/// All messages for `job_id`, oldest first.
pub(crate) async fn for_job(conn: &mut PgConnection, job_id: ResourceId) -> DbResult<Vec<LogMessage>> {
    let records = sqlx::query_as::<_, LogRecord>(
        r#"
        SELECT id, submission_job_id, message, created_at
        FROM log_messages
        WHERE submission_job_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(job_id.as_uuid())
    .fetch_all(conn)
    .await?;
    Ok(records.into_iter().map(LogMessage::from).collect())
}
