//! Scheduler error types.

use podpush_core::{HostingError, JobState, ResourceId};
use podpush_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] DbError),

    /// A claimed job matched no step. Not retried; the job is left as it was.
    #[error("job {job_id} is not runnable in state {state:?}")]
    InvalidState { job_id: ResourceId, state: JobState },

    /// The version could not be marked published; the claim's changes were
    /// discarded.
    #[error("failed to mark pod version {pod_version_id} published: {source}")]
    Publish {
        pod_version_id: ResourceId,
        #[source]
        source: DbError,
    },
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Failure inside a step body.
#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error(transparent)]
    Hosting(#[from] HostingError),

    #[error(transparent)]
    Domain(#[from] podpush_core::Error),

    /// The claim itself failed; the step outcome cannot be recorded.
    #[error(transparent)]
    Store(#[from] DbError),
}
