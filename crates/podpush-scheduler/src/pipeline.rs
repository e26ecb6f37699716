//! The submission pipeline: one step of one job per invocation.

use podpush_config::PipelineConfig;
use podpush_core::{
    HostingClient, HostingError, HostingResult, JobChange, JobState, PodVersionInfo, Registry,
    ResourceId, Step, SubmissionJob,
};
use podpush_db::JobClaim;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{SchedulerError, SchedulerResult, StepError};

/// What a single pipeline invocation did to the claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The step ran and its output was recorded.
    Completed(Step),
    /// The step failed and the job stays runnable.
    Retry { step: Step, attempts: i32 },
    /// The job was closed as failed.
    Abandoned,
}

/// Advances submission jobs through the fixed step sequence.
pub struct SubmissionPipeline {
    hosting: Arc<dyn HostingClient>,
    registry: Arc<dyn Registry>,
    config: PipelineConfig,
}

impl SubmissionPipeline {
    pub fn new(
        hosting: Arc<dyn HostingClient>,
        registry: Arc<dyn Registry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            hosting,
            registry,
            config,
        }
    }

    /// Run the next step of the claimed job and release the claim.
    ///
    /// Step failures never escape: they are logged on the job and counted
    /// against the retry ceiling. Store failures, a failed publish and a
    /// claimed job with nothing to do are returned as errors, and in each case
    /// the claim is dropped without committing anything.
    pub async fn perform_next_task<C: JobClaim>(&self, mut claim: C) -> SchedulerResult<TaskOutcome> {
        let job = claim.job().clone();

        let step = match job.state() {
            JobState::Ready(step) => step,
            JobState::BuildFailed => {
                claim.log("Travis build failed, not merging.").await?;
                claim.apply(JobChange::Abandon).await?;
                claim.release().await?;
                info!(job_id = %job.id, "Abandoned submission job after failed build");
                return Ok(TaskOutcome::Abandoned);
            }
            state => {
                error!(job_id = %job.id, ?state, "Claimed submission job has no runnable step");
                return Err(SchedulerError::InvalidState {
                    job_id: job.id,
                    state,
                });
            }
        };

        match self.execute(&mut claim, &job, step).await {
            Ok(change) => {
                let transition = claim.apply(change).await?;
                if transition.published {
                    // On failure the claim is dropped and the merge rolls back with it.
                    publish(&mut claim).await?;
                }
                claim.release().await?;
                info!(job_id = %job.id, %step, "Completed step");
                Ok(TaskOutcome::Completed(step))
            }
            Err(StepError::Store(e)) => Err(e.into()),
            Err(e) => {
                error!(
                    job_id = %job.id,
                    %step,
                    attempts = job.attempts + 1,
                    error = %e,
                    "Step failed"
                );
                claim.log(&format!("Error: {}", e)).await?;
                let transition = claim
                    .apply(JobChange::StepFailed {
                        retry_ceiling: self.config.retry_ceiling,
                    })
                    .await?;
                let attempts = claim.job().attempts;
                if transition.finished == Some(false) {
                    claim
                        .log(&format!("Giving up after {} attempts.", attempts))
                        .await?;
                }
                claim.release().await?;

                if transition.finished == Some(false) {
                    warn!(job_id = %job.id, %step, attempts, "Retry ceiling reached, job failed");
                    Ok(TaskOutcome::Abandoned)
                } else {
                    Ok(TaskOutcome::Retry { step, attempts })
                }
            }
        }
    }

    /// Log the step, then run its body and turn the result into a change.
    async fn execute<C: JobClaim>(
        &self,
        claim: &mut C,
        job: &SubmissionJob,
        step: Step,
    ) -> Result<JobChange, StepError> {
        match step {
            Step::FetchBaseCommit => {
                claim.log("Fetching latest commit SHA.").await?;
                let branch = self.hosting.base_branch().to_string();
                let sha = self.call(self.hosting.fetch_branch_head(&branch)).await?;
                Ok(JobChange::BaseCommit(sha))
            }
            Step::FetchBaseTree => {
                let commit = recorded(job, &job.base_commit_sha, "base_commit_sha")?;
                claim
                    .log(&format!("Fetching tree SHA of commit {}.", commit))
                    .await?;
                let sha = self.call(self.hosting.fetch_tree(commit)).await?;
                Ok(JobChange::BaseTree(sha))
            }
            Step::CreateTree => {
                let base_tree = recorded(job, &job.base_tree_sha, "base_tree_sha")?;
                claim
                    .log(&format!("Creating new tree based on tree {}.", base_tree))
                    .await?;
                let version = self.version(job.pod_version_id).await?;
                let sha = self
                    .call(self.hosting.create_tree(
                        base_tree,
                        &version.document_path(),
                        &version.document_payload,
                    ))
                    .await?;
                Ok(JobChange::NewTree(sha))
            }
            Step::CreateCommit => {
                let tree = recorded(job, &job.new_tree_sha, "new_tree_sha")?;
                let parent = recorded(job, &job.base_commit_sha, "base_commit_sha")?;
                claim
                    .log(&format!("Creating new commit with tree {}.", tree))
                    .await?;
                let version = self.version(job.pod_version_id).await?;
                let sha = self
                    .call(self.hosting.create_commit(tree, parent, &version.title()))
                    .await?;
                Ok(JobChange::NewCommit(sha))
            }
            Step::CreateBranch => {
                let commit = recorded(job, &job.new_commit_sha, "new_commit_sha")?;
                // The branch is named after the version, so it can only be
                // described once the version is known.
                let version = match self.version(job.pod_version_id).await {
                    Ok(version) => version,
                    Err(e) => {
                        claim
                            .log(&format!("Creating new branch with commit {}.", commit))
                            .await?;
                        return Err(e);
                    }
                };
                let name = version.branch_name(job.id);
                claim
                    .log(&format!(
                        "Creating new branch `{}' with commit {}.",
                        name, commit
                    ))
                    .await?;
                let reference = self.call(self.hosting.create_branch(&name, commit)).await?;
                Ok(JobChange::Branch(reference))
            }
            Step::CreatePullRequest => {
                let branch = recorded(job, &job.new_branch_ref, "new_branch_ref")?;
                claim
                    .log(&format!("Creating new pull-request with branch {}.", branch))
                    .await?;
                let version = self.version(job.pod_version_id).await?;
                let number = self
                    .call(
                        self.hosting
                            .create_pull_request(&version.title(), &version.url, branch),
                    )
                    .await?;
                Ok(JobChange::PullRequest(number))
            }
            Step::MergePullRequest => {
                let number = job.pull_request_number.ok_or_else(|| missing(job, "pull_request_number"))?;
                claim
                    .log(&format!("Merging pull-request number {}.", number))
                    .await?;
                let sha = self.call(self.hosting.merge_pull_request(number)).await?;
                Ok(JobChange::MergeCommit(sha))
            }
        }
    }

    async fn version(&self, id: ResourceId) -> Result<PodVersionInfo, StepError> {
        Ok(self.registry.pod_version(id).await?)
    }

    /// Bound a hosting call by the step timeout.
    async fn call<T>(&self, request: impl Future<Output = HostingResult<T>>) -> HostingResult<T> {
        tokio::time::timeout(self.config.step_timeout, request)
            .await
            .map_err(|_| HostingError::Timeout(self.config.step_timeout))?
    }
}

/// Mark the job's pod version published as part of the claim's changes.
pub(crate) async fn publish<C: JobClaim>(claim: &mut C) -> SchedulerResult<()> {
    let job_id = claim.job().id;
    let pod_version_id = claim.job().pod_version_id;
    if let Err(source) = claim.mark_published(pod_version_id).await {
        error!(%job_id, %pod_version_id, error = %source, "Failed to mark pod version published, discarding changes");
        return Err(SchedulerError::Publish {
            pod_version_id,
            source,
        });
    }
    claim.log("Published.").await?;
    info!(%job_id, %pod_version_id, "Pod version published");
    Ok(())
}

fn recorded<'a>(
    job: &SubmissionJob,
    value: &'a Option<String>,
    field: &str,
) -> Result<&'a str, StepError> {
    value.as_deref().ok_or_else(|| missing(job, field))
}

fn missing(job: &SubmissionJob, field: &str) -> StepError {
    podpush_core::Error::InvalidState(format!("job {} has no {}", job.id, field)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, MockHosting};
    use podpush_db::JobStore;

    #[tokio::test]
    async fn test_first_pass_records_base_commit() {
        let fx = Fixture::new(MockHosting::default()).await;

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed(Step::FetchBaseCommit));
        let job = fx.job().await;
        assert_eq!(job.base_commit_sha.as_deref(), Some("c0"));
        assert!(job.needs_to_perform_work);
        assert!(job.in_progress());
        assert_eq!(fx.hosting.calls(), vec!["fetch_branch_head master"]);
        assert!(!fx.store.is_locked(job.id));
    }

    #[tokio::test]
    async fn test_steps_run_in_order_until_pull_request() {
        let fx = Fixture::new(MockHosting::default()).await;

        for _ in 0..6 {
            let claim = fx.store.claim_next().await.unwrap().unwrap();
            fx.pipeline().perform_next_task(claim).await.unwrap();
        }

        let job = fx.job().await;
        let branch = fx.version.branch_name(job.id);
        assert_eq!(
            fx.hosting.calls(),
            vec![
                "fetch_branch_head master".to_string(),
                "fetch_tree c0".to_string(),
                "create_tree t0 AFNetworking/1.2.0/AFNetworking.podspec.json".to_string(),
                "create_commit t1 c0 [Add] AFNetworking 1.2.0".to_string(),
                format!("create_branch {} c1", branch),
                format!(
                    "create_pull_request [Add] AFNetworking 1.2.0 https://cocoapods.org/pods/AFNetworking refs/heads/{}",
                    branch
                ),
            ]
        );
        assert_eq!(job.pull_request_number, Some(42));
        assert!(!job.needs_to_perform_work);
        assert_eq!(job.state(), JobState::AwaitingBuild);
        assert!(fx.store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_logs_before_running() {
        let fx = Fixture::new(MockHosting::default()).await;
        for _ in 0..2 {
            let claim = fx.store.claim_next().await.unwrap().unwrap();
            fx.pipeline().perform_next_task(claim).await.unwrap();
        }

        let messages = fx.log_messages().await;
        assert_eq!(
            messages,
            vec![
                "Submitted",
                "Fetching latest commit SHA.",
                "Fetching tree SHA of commit c0.",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_counts_attempt_and_stays_runnable() {
        let fx = Fixture::new(MockHosting::failing("fetch_branch_head", 1)).await;

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Retry {
                step: Step::FetchBaseCommit,
                attempts: 1
            }
        );
        let job = fx.job().await;
        assert_eq!(job.attempts, 1);
        assert!(job.base_commit_sha.is_none());
        assert!(job.needs_to_perform_work);
        assert!(
            fx.log_messages()
                .await
                .last()
                .is_some_and(|m| m.starts_with("Error: "))
        );

        // Recovers on the next pass and starts counting afresh.
        let claim = fx.store.claim_next().await.unwrap().unwrap();
        fx.pipeline().perform_next_task(claim).await.unwrap();
        let job = fx.job().await;
        assert_eq!(job.base_commit_sha.as_deref(), Some("c0"));
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_tenth_failure_abandons_job() {
        let fx = Fixture::new(MockHosting::failing("fetch_branch_head", u32::MAX)).await;

        for attempt in 1..=9 {
            let claim = fx.store.claim_next().await.unwrap().unwrap();
            let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();
            assert_eq!(
                outcome,
                TaskOutcome::Retry {
                    step: Step::FetchBaseCommit,
                    attempts: attempt
                }
            );
        }

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Abandoned);

        let job = fx.job().await;
        assert!(job.failed());
        assert!(!job.needs_to_perform_work);
        assert_eq!(fx.hosting.calls().len(), 10);

        // An eleventh pass finds nothing to do and makes no API call.
        assert!(fx.store.claim_next().await.unwrap().is_none());
        assert_eq!(fx.hosting.calls().len(), 10);
    }

    #[tokio::test]
    async fn test_stuck_call_times_out_as_step_failure() {
        let fx = Fixture::with_timeout(MockHosting::hanging(), std::time::Duration::from_millis(20)).await;

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Retry { attempts: 1, .. }));
        let last = fx.log_messages().await.pop().unwrap();
        assert!(last.contains("timed out"), "{}", last);
    }

    #[tokio::test]
    async fn test_missing_pod_version_is_step_failure() {
        let fx = Fixture::new(MockHosting::default()).await;
        let orphan = fx.store.create(ResourceId::new()).await.unwrap();
        fx.advance_to(orphan.id, Step::CreateTree).await;

        let claim = fx.store.lock(orphan.id).await.unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Retry { step: Step::CreateTree, .. }));
        assert!(!fx.hosting.calls().iter().any(|c| c.starts_with("create_tree")));

        let messages: Vec<String> = fx
            .store
            .logs(orphan.id)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.message)
            .collect();
        assert_eq!(messages[1], "Creating new tree based on tree t0.");
        assert!(messages[2].starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_missing_pod_version_still_names_branch_step() {
        let fx = Fixture::new(MockHosting::default()).await;
        let orphan = fx.store.create(ResourceId::new()).await.unwrap();
        fx.advance_to(orphan.id, Step::CreateBranch).await;

        let claim = fx.store.lock(orphan.id).await.unwrap();
        fx.pipeline().perform_next_task(claim).await.unwrap();

        let logs = fx.store.logs(orphan.id).await.unwrap();
        assert_eq!(logs[1].message, "Creating new branch with commit c1.");
        assert!(logs[2].message.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_passing_build_merges_and_publishes() {
        let fx = Fixture::new(MockHosting::default()).await;
        fx.advance_to(fx.job_id, Step::MergePullRequest).await;
        fx.set_build_result(true).await;

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed(Step::MergePullRequest));
        let job = fx.job().await;
        assert!(job.completed());
        assert_eq!(job.merge_commit_sha.as_deref(), Some("m1"));
        assert!(!job.needs_to_perform_work);
        assert!(fx.registry.is_published(fx.version.id));
        assert_eq!(fx.hosting.calls(), vec!["merge_pull_request 42"]);
    }

    #[tokio::test]
    async fn test_failed_build_abandons_without_api_call() {
        let fx = Fixture::new(MockHosting::default()).await;
        fx.advance_to(fx.job_id, Step::MergePullRequest).await;

        // Simulate a row where the build failure was recorded but the job
        // was never closed out.
        let mut job = fx.job().await;
        job.travis_build_success = Some(false);
        job.needs_to_perform_work = true;
        fx.store.insert(job);

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        let outcome = fx.pipeline().perform_next_task(claim).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Abandoned);
        assert!(fx.job().await.failed());
        assert!(fx.hosting.calls().is_empty());
        assert!(!fx.registry.is_published(fx.version.id));
    }

    #[tokio::test]
    async fn test_job_awaiting_build_is_invalid_state() {
        let fx = Fixture::new(MockHosting::default()).await;
        fx.advance_to(fx.job_id, Step::MergePullRequest).await;
        let before = fx.job().await;

        let claim = fx.store.lock(fx.job_id).await.unwrap();
        let err = fx.pipeline().perform_next_task(claim).await.unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::InvalidState {
                state: JobState::AwaitingBuild,
                ..
            }
        ));
        assert_eq!(fx.job().await, before);
        assert!(fx.hosting.calls().is_empty());
        assert!(!fx.store.is_locked(fx.job_id));
    }

    #[tokio::test]
    async fn test_publish_failure_discards_merge() {
        let fx = Fixture::new(MockHosting::default()).await;
        let orphan = fx.store.create(ResourceId::new()).await.unwrap();
        fx.advance_to(orphan.id, Step::MergePullRequest).await;
        let mut job = fx.store.get(orphan.id).await.unwrap();
        job.travis_build_success = Some(true);
        job.needs_to_perform_work = true;
        fx.store.insert(job.clone());

        let claim = fx.store.lock(orphan.id).await.unwrap();
        let err = fx.pipeline().perform_next_task(claim).await.unwrap_err();

        assert!(matches!(err, SchedulerError::Publish { .. }));
        // Neither the merge nor the publish was kept.
        let after = fx.store.get(orphan.id).await.unwrap();
        assert_eq!(after, job);
        assert_eq!(after.state(), JobState::Ready(Step::MergePullRequest));
        assert!(!fx.store.is_locked(orphan.id));
        let logs = fx.store.logs(orphan.id).await.unwrap();
        assert!(!logs.iter().any(|log| log.message.starts_with("Merging")));
    }

    #[tokio::test]
    async fn test_merge_and_publish_commit_together() {
        let fx = Fixture::new(MockHosting::default()).await;
        fx.advance_to(fx.job_id, Step::MergePullRequest).await;
        fx.set_build_result(true).await;

        let claim = fx.store.claim_next().await.unwrap().unwrap();
        fx.pipeline().perform_next_task(claim).await.unwrap();

        assert!(fx.job().await.completed());
        assert!(fx.registry.is_published(fx.version.id));
        assert_eq!(
            fx.log_messages().await.last().map(String::as_str),
            Some("Published.")
        );
    }
}
