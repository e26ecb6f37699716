//! External signals: CI build results and merges made outside the pipeline.
//!
//! Each signal locks the job that owns the pull request, waiting for a
//! dispatcher that currently holds it, so signals and steps never interleave.

use podpush_core::{JobChange, SubmissionJob};
use podpush_db::{JobClaim, JobStore};
use tracing::info;

use crate::error::SchedulerResult;
use crate::pipeline::publish;

pub struct SignalHandler<S: JobStore> {
    store: S,
}

impl<S: JobStore> SignalHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record the CI result for pull request `number`.
    ///
    /// A pass makes the job runnable again so the next dispatcher pass merges
    /// it. A failure closes the job as failed; nothing is merged.
    pub async fn record_build_result(&self, number: i64, success: bool) -> SchedulerResult<SubmissionJob> {
        let mut claim = self.store.lock_by_pull_request(number).await?;
        claim.apply(JobChange::BuildResult(success)).await?;
        let result = if success { "passed" } else { "failed" };
        claim
            .log(&format!("Travis build result: {}", result))
            .await?;

        let job = claim.job().clone();
        claim.release().await?;
        info!(job_id = %job.id, pull_request = number, result, "Recorded build result");
        Ok(job)
    }

    /// Record that pull request `number` was merged as `merge_commit_sha`
    /// by someone other than the pipeline.
    ///
    /// The merge and the published version are committed together; if the
    /// version cannot be marked, neither is recorded.
    pub async fn record_merge(&self, number: i64, merge_commit_sha: &str) -> SchedulerResult<SubmissionJob> {
        let mut claim = self.store.lock_by_pull_request(number).await?;
        claim
            .apply(JobChange::MergeCommit(merge_commit_sha.to_string()))
            .await?;
        claim
            .log(&format!("Pull request merged as {}.", merge_commit_sha))
            .await?;

        publish(&mut claim).await?;
        let job = claim.job().clone();
        claim.release().await?;
        info!(job_id = %job.id, pull_request = number, "Recorded out-of-band merge");
        Ok(job)
    }
}
