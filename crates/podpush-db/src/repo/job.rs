//! Submission job store.
//!
//! Work is handed out through claims. A claim owns the row lock on one job
//! for as long as it lives; every field change made through it runs in its
//! own savepoint, and nothing becomes visible to other processes until the
//! claim is released.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podpush_core::{JobChange, LogMessage, ResourceId, SubmissionJob, Transition};
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::trace;

use super::logs;
use crate::{DbError, DbResult};

/// A submission job row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionJobRecord {
    pub id: uuid::Uuid,
    pub pod_version_id: uuid::Uuid,
    pub base_commit_sha: Option<String>,
    pub base_tree_sha: Option<String>,
    pub new_tree_sha: Option<String>,
    pub new_commit_sha: Option<String>,
    pub new_branch_ref: Option<String>,
    pub pull_request_number: Option<i64>,
    pub merge_commit_sha: Option<String>,
    pub travis_build_success: Option<bool>,
    pub needs_to_perform_work: bool,
    pub succeeded: Option<bool>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubmissionJobRecord> for SubmissionJob {
    fn from(r: SubmissionJobRecord) -> Self {
        Self {
            id: r.id.into(),
            pod_version_id: r.pod_version_id.into(),
            base_commit_sha: r.base_commit_sha,
            base_tree_sha: r.base_tree_sha,
            new_tree_sha: r.new_tree_sha,
            new_commit_sha: r.new_commit_sha,
            new_branch_ref: r.new_branch_ref,
            pull_request_number: r.pull_request_number,
            merge_commit_sha: r.merge_commit_sha,
            travis_build_success: r.travis_build_success,
            needs_to_perform_work: r.needs_to_perform_work,
            succeeded: r.succeeded,
            attempts: r.attempts,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Exclusive hold on one job.
///
/// Dropping a claim without calling [`JobClaim::release`] discards every
/// change made through it.
#[async_trait]
pub trait JobClaim: Send {
    fn job(&self) -> &SubmissionJob;

    /// Apply `change` under the job's rules and persist the result atomically.
    async fn apply(&mut self, change: JobChange) -> DbResult<Transition>;

    /// Append a log message to the job.
    async fn log(&mut self, message: &str) -> DbResult<()>;

    /// Mark `pod_version_id` published. Becomes visible together with the
    /// claim's job changes, or not at all.
    async fn mark_published(&mut self, pod_version_id: ResourceId) -> DbResult<()>;

    /// Make all changes durable and give up the lock.
    async fn release(self) -> DbResult<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    type Claim: JobClaim;

    /// Create a job for `pod_version_id` and log that it was submitted.
    async fn create(&self, pod_version_id: ResourceId) -> DbResult<SubmissionJob>;

    async fn get(&self, id: ResourceId) -> DbResult<SubmissionJob>;

    /// Most recently touched jobs first.
    async fn list(&self, limit: i64) -> DbResult<Vec<SubmissionJob>>;

    /// Log trail of a job, oldest first.
    async fn logs(&self, id: ResourceId) -> DbResult<Vec<LogMessage>>;

    /// The job that opened pull request `number`, without locking it.
    async fn find_by_pull_request(&self, number: i64) -> DbResult<Option<SubmissionJob>>;

    /// Claim the runnable job that has waited longest, skipping jobs someone
    /// else holds. `None` when nothing is runnable.
    async fn claim_next(&self) -> DbResult<Option<Self::Claim>>;

    /// Claim a specific job, waiting for any current holder to finish.
    async fn lock(&self, id: ResourceId) -> DbResult<Self::Claim>;

    /// Claim the job that opened pull request `number`, waiting if held.
    async fn lock_by_pull_request(&self, number: i64) -> DbResult<Self::Claim>;
}

/// PostgreSQL implementation of JobStore.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    type Claim = PgJobClaim;

    async fn create(&self, pod_version_id: ResourceId) -> DbResult<SubmissionJob> {
        let job = SubmissionJob::new(pod_version_id);
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            r#"
            INSERT INTO submission_jobs (id, pod_version_id, needs_to_perform_work, attempts, created_at, updated_at)
            VALUES ($1, $2, TRUE, 0, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(pod_version_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let unknown_version = e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation());
            if unknown_version {
                DbError::NotFound(format!("pod version {}", pod_version_id))
            } else {
                DbError::Database(e)
            }
        })?;

        logs::append(&mut tx, job.id, "Submitted").await?;
        tx.commit().await?;
        Ok(record.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<SubmissionJob> {
        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            "SELECT * FROM submission_jobs WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission job {}", id)))?;
        Ok(record.into())
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<SubmissionJob>> {
        let records = sqlx::query_as::<_, SubmissionJobRecord>(
            "SELECT * FROM submission_jobs ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(SubmissionJob::from).collect())
    }

    async fn logs(&self, id: ResourceId) -> DbResult<Vec<LogMessage>> {
        let mut conn = self.pool.acquire().await?;
        logs::for_job(&mut conn, id).await
    }

    async fn find_by_pull_request(&self, number: i64) -> DbResult<Option<SubmissionJob>> {
        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            "SELECT * FROM submission_jobs WHERE pull_request_number = $1",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(SubmissionJob::from))
    }

    async fn claim_next(&self) -> DbResult<Option<PgJobClaim>> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            r#"
            SELECT * FROM submission_jobs
            WHERE needs_to_perform_work
            ORDER BY updated_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        match record {
            Some(record) => {
                trace!(job_id = %record.id, "Claimed submission job");
                Ok(Some(PgJobClaim {
                    tx,
                    job: record.into(),
                }))
            }
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn lock(&self, id: ResourceId) -> DbResult<PgJobClaim> {
        let mut tx = self.pool.begin().await?;
        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            "SELECT * FROM submission_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission job {}", id)))?;

        Ok(PgJobClaim {
            tx,
            job: record.into(),
        })
    }

    async fn lock_by_pull_request(&self, number: i64) -> DbResult<PgJobClaim> {
        let mut tx = self.pool.begin().await?;
        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            "SELECT * FROM submission_jobs WHERE pull_request_number = $1 FOR UPDATE",
        )
        .bind(number)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission job for pull request #{}", number)))?;

        Ok(PgJobClaim {
            tx,
            job: record.into(),
        })
    }
}

/// A claimed job together with the transaction holding its row lock.
pub struct PgJobClaim {
    tx: Transaction<'static, Postgres>,
    job: SubmissionJob,
}

#[async_trait]
impl JobClaim for PgJobClaim {
    fn job(&self) -> &SubmissionJob {
        &self.job
    }

    async fn apply(&mut self, change: JobChange) -> DbResult<Transition> {
        let mut next = self.job.clone();
        let transition = next.apply(change)?;

        let mut savepoint = self.tx.begin().await?;
        let record = sqlx::query_as::<_, SubmissionJobRecord>(
            r#"
            UPDATE submission_jobs SET
                base_commit_sha = $2,
                base_tree_sha = $3,
                new_tree_sha = $4,
                new_commit_sha = $5,
                new_branch_ref = $6,
                pull_request_number = $7,
                merge_commit_sha = $8,
                travis_build_success = $9,
                needs_to_perform_work = $10,
                succeeded = $11,
                attempts = $12,
                updated_at = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(&next.base_commit_sha)
        .bind(&next.base_tree_sha)
        .bind(&next.new_tree_sha)
        .bind(&next.new_commit_sha)
        .bind(&next.new_branch_ref)
        .bind(next.pull_request_number)
        .bind(&next.merge_commit_sha)
        .bind(next.travis_build_success)
        .bind(next.needs_to_perform_work)
        .bind(next.succeeded)
        .bind(next.attempts)
        .fetch_one(&mut *savepoint)
        .await?;
        savepoint.commit().await?;

        self.job = record.into();
        Ok(transition)
    }

    async fn log(&mut self, message: &str) -> DbResult<()> {
        logs::append(&mut self.tx, self.job.id, message).await
    }

    async fn mark_published(&mut self, pod_version_id: ResourceId) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE pod_versions SET published = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(pod_version_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("pod version {}", pod_version_id)));
        }
        Ok(())
    }

    async fn release(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
