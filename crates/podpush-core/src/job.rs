//! Submission jobs and their step state machine.
//!
//! A job's progress is persisted as a set of nullable fields, each written
//! exactly once by exactly one step. [`Step`] names those steps in their fixed
//! order, and [`SubmissionJob::state`] derives an explicit [`JobState`] from
//! the fields so callers match on a tag instead of chaining null checks.
//!
//! All field writes go through [`SubmissionJob::apply`], which enforces
//! monotonic progress and recomputes `needs_to_perform_work`.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// One of the fixed pipeline actions, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[display("fetch base commit")]
    FetchBaseCommit,
    #[display("fetch base tree")]
    FetchBaseTree,
    #[display("create tree")]
    CreateTree,
    #[display("create commit")]
    CreateCommit,
    #[display("create branch")]
    CreateBranch,
    #[display("create pull request")]
    CreatePullRequest,
    #[display("merge pull request")]
    MergePullRequest,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::FetchBaseCommit,
        Step::FetchBaseTree,
        Step::CreateTree,
        Step::CreateCommit,
        Step::CreateBranch,
        Step::CreatePullRequest,
        Step::MergePullRequest,
    ];

    /// Whether the field this step writes is already set on `job`.
    pub fn is_done(self, job: &SubmissionJob) -> bool {
        match self {
            Step::FetchBaseCommit => job.base_commit_sha.is_some(),
            Step::FetchBaseTree => job.base_tree_sha.is_some(),
            Step::CreateTree => job.new_tree_sha.is_some(),
            Step::CreateCommit => job.new_commit_sha.is_some(),
            Step::CreateBranch => job.new_branch_ref.is_some(),
            Step::CreatePullRequest => job.pull_request_number.is_some(),
            Step::MergePullRequest => job.merge_commit_sha.is_some(),
        }
    }
}

/// Where a job stands, derived purely from its persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum JobState {
    /// The given step is next and may run now.
    Ready(Step),
    /// A pull request is open and CI has not reported yet.
    AwaitingBuild,
    /// CI reported failure but the job has not been closed out yet.
    BuildFailed,
    Succeeded,
    Failed,
    /// Every progress field is set yet `succeeded` is unknown. Only reachable
    /// by writing rows outside [`SubmissionJob::apply`].
    Inconsistent,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// A single write to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    BaseCommit(String),
    BaseTree(String),
    NewTree(String),
    NewCommit(String),
    Branch(String),
    PullRequest(i64),
    MergeCommit(String),
    /// CI result for the job's pull request.
    BuildResult(bool),
    /// The current step failed once more.
    StepFailed { retry_ceiling: u32 },
    /// Close the job as failed without further work.
    Abandon,
}

impl JobChange {
    /// The step whose output this change records, if it is a progress write.
    pub fn step(&self) -> Option<Step> {
        match self {
            JobChange::BaseCommit(_) => Some(Step::FetchBaseCommit),
            JobChange::BaseTree(_) => Some(Step::FetchBaseTree),
            JobChange::NewTree(_) => Some(Step::CreateTree),
            JobChange::NewCommit(_) => Some(Step::CreateCommit),
            JobChange::Branch(_) => Some(Step::CreateBranch),
            JobChange::PullRequest(_) => Some(Step::CreatePullRequest),
            JobChange::MergeCommit(_) => Some(Step::MergePullRequest),
            JobChange::BuildResult(_) | JobChange::StepFailed { .. } | JobChange::Abandon => None,
        }
    }
}

/// Side effects the caller owes after a successful [`SubmissionJob::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// `succeeded` just became true; the owning version must be marked published.
    pub published: bool,
    /// `succeeded` just became terminal with this value.
    pub finished: Option<bool>,
}

/// One durable attempt to publish a pod version through a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub id: ResourceId,
    pub pod_version_id: ResourceId,
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

impl SubmissionJob {
    /// A freshly submitted job with no progress.
    pub fn new(pod_version_id: ResourceId) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            pod_version_id,
            base_commit_sha: None,
            base_tree_sha: None,
            new_tree_sha: None,
            new_commit_sha: None,
            new_branch_ref: None,
            pull_request_number: None,
            merge_commit_sha: None,
            travis_build_success: None,
            needs_to_perform_work: true,
            succeeded: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.succeeded.is_none()
    }

    pub fn completed(&self) -> bool {
        self.succeeded == Some(true)
    }

    pub fn failed(&self) -> bool {
        self.succeeded == Some(false)
    }

    /// First step whose output field is still unset.
    pub fn next_step(&self) -> Option<Step> {
        Step::ALL.into_iter().find(|step| !step.is_done(self))
    }

    pub fn state(&self) -> JobState {
        match self.succeeded {
            Some(true) => JobState::Succeeded,
            Some(false) => JobState::Failed,
            None => match self.next_step() {
                Some(Step::MergePullRequest) => match self.travis_build_success {
                    None => JobState::AwaitingBuild,
                    Some(true) => JobState::Ready(Step::MergePullRequest),
                    Some(false) => JobState::BuildFailed,
                },
                Some(step) => JobState::Ready(step),
                None => JobState::Inconsistent,
            },
        }
    }

    /// Apply a change, enforcing the job's invariants.
    ///
    /// Finished jobs reject every change. Progress fields may only be written
    /// once and only in step order; writing one resets `attempts`.
    pub fn apply(&mut self, change: JobChange) -> Result<Transition> {
        if let Some(succeeded) = self.succeeded {
            return Err(Error::Conflict(format!(
                "job {} already finished (succeeded = {})",
                self.id, succeeded
            )));
        }

        let progress = change.step();
        if let Some(step) = progress {
            if step.is_done(self) {
                return Err(Error::Conflict(format!(
                    "job {}: output of step '{}' is already recorded",
                    self.id, step
                )));
            }
            if let Some(pending) = self.next_step() {
                if pending < step {
                    return Err(Error::InvalidState(format!(
                        "job {}: cannot record '{}' before '{}'",
                        self.id, step, pending
                    )));
                }
            }
        }

        match change {
            JobChange::BaseCommit(sha) => self.base_commit_sha = Some(sha),
            JobChange::BaseTree(sha) => self.base_tree_sha = Some(sha),
            JobChange::NewTree(sha) => self.new_tree_sha = Some(sha),
            JobChange::NewCommit(sha) => self.new_commit_sha = Some(sha),
            JobChange::Branch(name) => self.new_branch_ref = Some(name),
            JobChange::PullRequest(number) => self.pull_request_number = Some(number),
            JobChange::MergeCommit(sha) => {
                self.merge_commit_sha = Some(sha);
                self.succeeded = Some(true);
            }
            JobChange::BuildResult(success) => {
                self.travis_build_success = Some(success);
                if !success {
                    self.succeeded = Some(false);
                }
            }
            JobChange::StepFailed { retry_ceiling } => {
                self.attempts += 1;
                if i64::from(self.attempts) >= i64::from(retry_ceiling) {
                    self.succeeded = Some(false);
                }
            }
            JobChange::Abandon => self.succeeded = Some(false),
        }

        if progress.is_some() {
            self.attempts = 0;
        }

        self.recompute_needs_work();
        self.updated_at = Utc::now();

        Ok(Transition {
            published: self.succeeded == Some(true),
            finished: self.succeeded,
        })
    }

    fn recompute_needs_work(&mut self) {
        self.needs_to_perform_work = self.succeeded.is_none()
            && match self.pull_request_number {
                None => true,
                Some(_) => self.travis_build_success == Some(true),
            };
    }
}

/// An append-only status line attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: ResourceId,
    pub job_id: ResourceId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(job_id: ResourceId, message: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            job_id,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
