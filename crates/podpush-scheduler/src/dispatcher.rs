//! Claims runnable jobs and hands them to the pipeline one step at a time.

use podpush_db::{JobClaim, JobStore};
use tracing::debug;

use crate::error::SchedulerResult;
use crate::pipeline::{SubmissionPipeline, TaskOutcome};

pub struct Dispatcher<S: JobStore> {
    store: S,
    pipeline: SubmissionPipeline,
}

impl<S: JobStore> Dispatcher<S> {
    pub fn new(store: S, pipeline: SubmissionPipeline) -> Self {
        Self { store, pipeline }
    }

    /// Advance the longest-waiting runnable job by one step.
    ///
    /// Returns `false`, touching nothing, when no job is runnable.
    pub async fn perform_task(&self) -> SchedulerResult<bool> {
        Ok(self.perform_task_outcome().await?.is_some())
    }

    /// Like [`Dispatcher::perform_task`], reporting what happened to the job.
    pub async fn perform_task_outcome(&self) -> SchedulerResult<Option<TaskOutcome>> {
        let Some(claim) = self.store.claim_next().await? else {
            return Ok(None);
        };
        let job_id = claim.job().id;
        let outcome = self.pipeline.perform_next_task(claim).await?;
        debug!(%job_id, ?outcome, "Dispatcher pass finished");
        Ok(Some(outcome))
    }
}
