//! In-memory job store and registry.
//!
//! Same claim semantics as the PostgreSQL store: a claimed job is invisible
//! to `claim_next` and makes `lock` wait until the claim is dropped. Changes
//! made through a claim are staged on it and only written to the store by
//! `release`; dropping the claim discards them.

use async_trait::async_trait;
use podpush_core::{
    JobChange, LogMessage, PodVersionInfo, Registry, ResourceId, SubmissionJob, Transition,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::job::{JobClaim, JobStore};
use crate::{DbError, DbResult};

#[derive(Default)]
struct Inner {
    jobs: HashMap<ResourceId, SubmissionJob>,
    logs: Vec<LogMessage>,
    locked: HashSet<ResourceId>,
}

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<Mutex<Inner>>,
    released: Arc<Notify>,
    registry: MemoryRegistry,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose claims publish versions in `registry`.
    pub fn with_registry(registry: MemoryRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Store `job` as-is, bypassing the job's rules.
    pub fn insert(&self, job: SubmissionJob) {
        self.state().jobs.insert(job.id, job);
    }

    pub fn is_locked(&self, id: ResourceId) -> bool {
        self.state().locked.contains(&id)
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `Inner` half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, job: SubmissionJob) -> MemoryJobClaim {
        MemoryJobClaim {
            store: self.clone(),
            job,
            logs: Vec::new(),
            published: Vec::new(),
        }
    }

    async fn lock_where<F>(&self, describe: String, matches: F) -> DbResult<MemoryJobClaim>
    where
        F: Fn(&SubmissionJob) -> bool + Send + Sync,
    {
        loop {
            // Register for wakeups before looking, so a release in between is not missed.
            let released = self.released.notified();
            {
                let mut state = self.state();
                let job = state
                    .jobs
                    .values()
                    .find(|job| matches(job))
                    .cloned()
                    .ok_or_else(|| DbError::NotFound(describe.clone()))?;
                if state.locked.insert(job.id) {
                    return Ok(self.claim(job));
                }
            }
            released.await;
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    type Claim = MemoryJobClaim;

    async fn create(&self, pod_version_id: ResourceId) -> DbResult<SubmissionJob> {
        let job = SubmissionJob::new(pod_version_id);
        let mut state = self.state();
        state.jobs.insert(job.id, job.clone());
        state.logs.push(LogMessage::new(job.id, "Submitted"));
        Ok(job)
    }

    async fn get(&self, id: ResourceId) -> DbResult<SubmissionJob> {
        self.state()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("submission job {}", id)))
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<SubmissionJob>> {
        let mut jobs: Vec<_> = self.state().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        jobs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(jobs)
    }

    async fn logs(&self, id: ResourceId) -> DbResult<Vec<LogMessage>> {
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|log| log.job_id == id)
            .cloned()
            .collect())
    }

    async fn find_by_pull_request(&self, number: i64) -> DbResult<Option<SubmissionJob>> {
        Ok(self
            .state()
            .jobs
            .values()
            .find(|job| job.pull_request_number == Some(number))
            .cloned())
    }

    async fn claim_next(&self) -> DbResult<Option<MemoryJobClaim>> {
        let mut state = self.state();
        let next = state
            .jobs
            .values()
            .filter(|job| job.needs_to_perform_work && !state.locked.contains(&job.id))
            .min_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)))
            .cloned();

        Ok(next.map(|job| {
            state.locked.insert(job.id);
            self.claim(job)
        }))
    }

    async fn lock(&self, id: ResourceId) -> DbResult<MemoryJobClaim> {
        self.lock_where(format!("submission job {}", id), move |job| job.id == id)
            .await
    }

    async fn lock_by_pull_request(&self, number: i64) -> DbResult<MemoryJobClaim> {
        self.lock_where(
            format!("submission job for pull request #{}", number),
            move |job| job.pull_request_number == Some(number),
        )
        .await
    }
}

/// A held job and the changes staged on it.
pub struct MemoryJobClaim {
    store: MemoryJobStore,
    job: SubmissionJob,
    logs: Vec<LogMessage>,
    published: Vec<ResourceId>,
}

impl fmt::Debug for MemoryJobClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryJobClaim")
            .field("job", &self.job.id)
            .field("staged_logs", &self.logs.len())
            .field("published", &self.published)
            .finish()
    }
}

#[async_trait]
impl JobClaim for MemoryJobClaim {
    fn job(&self) -> &SubmissionJob {
        &self.job
    }

    async fn apply(&mut self, change: JobChange) -> DbResult<Transition> {
        let mut next = self.job.clone();
        let transition = next.apply(change)?;
        self.job = next;
        Ok(transition)
    }

    async fn log(&mut self, message: &str) -> DbResult<()> {
        self.logs.push(LogMessage::new(self.job.id, message));
        Ok(())
    }

    async fn mark_published(&mut self, pod_version_id: ResourceId) -> DbResult<()> {
        if !self.store.registry.contains(pod_version_id) {
            return Err(DbError::NotFound(format!("pod version {}", pod_version_id)));
        }
        self.published.push(pod_version_id);
        Ok(())
    }

    async fn release(mut self) -> DbResult<()> {
        {
            let mut state = self.store.state();
            state.jobs.insert(self.job.id, self.job.clone());
            state.logs.append(&mut self.logs);
        }
        for id in self.published.drain(..) {
            self.store.registry.set_published(id);
        }
        Ok(())
    }
}

impl Drop for MemoryJobClaim {
    fn drop(&mut self) {
        self.store.state().locked.remove(&self.job.id);
        self.store.released.notify_waiters();
    }
}

/// In-memory registry of pod versions.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    versions: Arc<Mutex<HashMap<ResourceId, PodVersionInfo>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        pod_name: &str,
        version: &str,
        url: &str,
        document_payload: &str,
    ) -> PodVersionInfo {
        let info = PodVersionInfo {
            id: ResourceId::new(),
            pod_name: pod_name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            document_payload: document_payload.to_string(),
            published: false,
        };
        self.versions().insert(info.id, info.clone());
        info
    }

    pub fn is_published(&self, id: ResourceId) -> bool {
        self.versions().get(&id).is_some_and(|v| v.published)
    }

    fn contains(&self, id: ResourceId) -> bool {
        self.versions().contains_key(&id)
    }

    fn set_published(&self, id: ResourceId) {
        if let Some(version) = self.versions().get_mut(&id) {
            version.published = true;
        }
    }

    fn versions(&self) -> MutexGuard<'_, HashMap<ResourceId, PodVersionInfo>> {
        self.versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn pod_version(&self, id: ResourceId) -> podpush_core::Result<PodVersionInfo> {
        self.versions()
            .get(&id)
            .cloned()
            .ok_or_else(|| podpush_core::Error::NotFound(format!("pod version {}", id)))
    }
}
