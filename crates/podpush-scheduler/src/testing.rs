//! Shared fixtures for scheduler tests.

use async_trait::async_trait;
use podpush_config::PipelineConfig;
use podpush_core::{
    HostingClient, HostingError, HostingResult, JobChange, PodVersionInfo, ResourceId, Step,
    SubmissionJob,
};
use podpush_db::{JobClaim, JobStore, MemoryJobStore, MemoryRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Dispatcher, SubmissionPipeline};

pub(crate) const PULL_REQUEST: i64 = 42;

/// Hosting client that records every call and answers with fixed SHAs.
#[derive(Default)]
pub(crate) struct MockHosting {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    hang: bool,
}

impl MockHosting {
    /// Fail the next `times` calls named `call`.
    pub fn failing(call: &'static str, times: u32) -> Self {
        let mock = Self::default();
        mock.failures.lock().unwrap().insert(call, times);
        mock
    }

    /// Never answer.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, name: &'static str, call: String) -> HostingResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(HostingError::Api {
                    status: 502,
                    message: format!("{} unavailable", name),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl HostingClient for MockHosting {
    fn base_branch(&self) -> &str {
        "master"
    }

    async fn fetch_branch_head(&self, branch: &str) -> HostingResult<String> {
        self.record("fetch_branch_head", format!("fetch_branch_head {}", branch))
            .await?;
        Ok("c0".to_string())
    }

    async fn fetch_tree(&self, commit_sha: &str) -> HostingResult<String> {
        self.record("fetch_tree", format!("fetch_tree {}", commit_sha))
            .await?;
        Ok("t0".to_string())
    }

    async fn create_tree(
        &self,
        base_tree_sha: &str,
        path: &str,
        _content: &str,
    ) -> HostingResult<String> {
        self.record("create_tree", format!("create_tree {} {}", base_tree_sha, path))
            .await?;
        Ok("t1".to_string())
    }

    async fn create_commit(
        &self,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> HostingResult<String> {
        self.record(
            "create_commit",
            format!("create_commit {} {} {}", tree_sha, parent_sha, message),
        )
        .await?;
        Ok("c1".to_string())
    }

    async fn create_branch(&self, name: &str, commit_sha: &str) -> HostingResult<String> {
        self.record("create_branch", format!("create_branch {} {}", name, commit_sha))
            .await?;
        Ok(format!("refs/heads/{}", name))
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        branch_ref: &str,
    ) -> HostingResult<i64> {
        self.record(
            "create_pull_request",
            format!("create_pull_request {} {} {}", title, body, branch_ref),
        )
        .await?;
        Ok(PULL_REQUEST)
    }

    async fn merge_pull_request(&self, number: i64) -> HostingResult<String> {
        self.record("merge_pull_request", format!("merge_pull_request {}", number))
            .await?;
        Ok("m1".to_string())
    }
}

/// One registered pod version with one freshly submitted job.
pub(crate) struct Fixture {
    pub store: MemoryJobStore,
    pub registry: MemoryRegistry,
    pub hosting: Arc<MockHosting>,
    pub version: PodVersionInfo,
    pub job_id: ResourceId,
    config: PipelineConfig,
}

impl Fixture {
    pub async fn new(hosting: MockHosting) -> Self {
        Self::with_timeout(hosting, Duration::from_secs(5)).await
    }

    pub async fn with_timeout(hosting: MockHosting, step_timeout: Duration) -> Self {
        let registry = MemoryRegistry::new();
        let store = MemoryJobStore::with_registry(registry.clone());
        let hosting = Arc::new(hosting);
        let version = registry.register(
            "AFNetworking",
            "1.2.0",
            "https://cocoapods.org/pods/AFNetworking",
            r#"{"name":"AFNetworking","version":"1.2.0"}"#,
        );
        let job = store.create(version.id).await.unwrap();

        let config = PipelineConfig {
            step_timeout,
            poll_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        Self {
            store,
            registry,
            hosting,
            version,
            job_id: job.id,
            config,
        }
    }

    pub fn pipeline(&self) -> SubmissionPipeline {
        SubmissionPipeline::new(
            self.hosting.clone() as Arc<dyn HostingClient>,
            Arc::new(self.registry.clone()),
            self.config.clone(),
        )
    }

    pub fn dispatcher(&self) -> Dispatcher<MemoryJobStore> {
        Dispatcher::new(self.store.clone(), self.pipeline())
    }

    pub async fn job(&self) -> SubmissionJob {
        self.store.get(self.job_id).await.unwrap()
    }

    pub async fn log_messages(&self) -> Vec<String> {
        self.store
            .logs(self.job_id)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.message)
            .collect()
    }

    /// Record canned output for every step before `step` on job `id`.
    pub async fn advance_to(&self, id: ResourceId, step: Step) {
        let mut job = self.store.get(id).await.unwrap();
        for done in Step::ALL.into_iter().take_while(|s| *s < step) {
            let change = match done {
                Step::FetchBaseCommit => JobChange::BaseCommit("c0".into()),
                Step::FetchBaseTree => JobChange::BaseTree("t0".into()),
                Step::CreateTree => JobChange::NewTree("t1".into()),
                Step::CreateCommit => JobChange::NewCommit("c1".into()),
                Step::CreateBranch => JobChange::Branch(format!("refs/heads/job-{}", id)),
                Step::CreatePullRequest => JobChange::PullRequest(PULL_REQUEST),
                Step::MergePullRequest => JobChange::MergeCommit("m1".into()),
            };
            job.apply(change).unwrap();
        }
        self.store.insert(job);
    }

    pub async fn set_build_result(&self, success: bool) {
        let mut claim = self.store.lock_by_pull_request(PULL_REQUEST).await.unwrap();
        claim.apply(JobChange::BuildResult(success)).await.unwrap();
        claim.release().await.unwrap();
    }
}
