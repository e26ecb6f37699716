//! Pod registry collaborator.
//!
//! The registry owns pods and their versions. The pipeline only reads what it
//! needs to build the submission; marking a version published happens on the
//! job claim so it commits together with the merge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ResourceId, Result, naming};

/// What the pipeline needs to know about the version it is submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVersionInfo {
    pub id: ResourceId,
    pub pod_name: String,
    pub version: String,
    /// Public URL of the version, used as the pull request body.
    pub url: String,
    /// The validated document written into the index repository.
    pub document_payload: String,
    pub published: bool,
}

impl PodVersionInfo {
    pub fn document_path(&self) -> String {
        naming::document_path(&self.pod_name, &self.version)
    }

    pub fn title(&self) -> String {
        naming::submission_title(&self.pod_name, &self.version)
    }

    pub fn branch_name(&self, job_id: ResourceId) -> String {
        naming::branch_name(&self.pod_name, &self.version, job_id)
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn pod_version(&self, id: ResourceId) -> Result<PodVersionInfo>;
}
