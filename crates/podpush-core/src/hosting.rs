//! Git hosting collaborator.
//!
//! The seven calls the pipeline makes against the index repository's host.
//! Implementations are configured with the repository, target branch and
//! credentials at construction time.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostingError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type HostingResult<T> = std::result::Result<T, HostingError>;

#[async_trait]
pub trait HostingClient: Send + Sync {
    /// Branch that submissions are based on and merged into.
    fn base_branch(&self) -> &str;

    /// SHA of the commit at the head of `branch`.
    async fn fetch_branch_head(&self, branch: &str) -> HostingResult<String>;

    /// SHA of the tree of `commit_sha`.
    async fn fetch_tree(&self, commit_sha: &str) -> HostingResult<String>;

    /// New tree on top of `base_tree_sha` with `content` written at `path`.
    async fn create_tree(
        &self,
        base_tree_sha: &str,
        path: &str,
        content: &str,
    ) -> HostingResult<String>;

    async fn create_commit(
        &self,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> HostingResult<String>;

    /// Create branch `name` at `commit_sha`, returning the full ref.
    async fn create_branch(&self, name: &str, commit_sha: &str) -> HostingResult<String>;

    /// Open a pull request from `branch_ref` against the base branch.
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        branch_ref: &str,
    ) -> HostingResult<i64>;

    /// Merge pull request `number`, returning the merge commit SHA.
    async fn merge_pull_request(&self, number: i64) -> HostingResult<String>;
}
