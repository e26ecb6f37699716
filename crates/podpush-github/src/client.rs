//! GitHub API client for the index repository.

use async_trait::async_trait;
use podpush_config::GitHubConfig;
use podpush_core::{HostingClient, HostingError, HostingResult};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

const USER_AGENT: &str = "podpush";

/// GitHub API client bound to one repository.
pub struct GitHubClient {
    client: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> HostingResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HostingError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Absolute URL for a path below the repository, e.g. `git/trees`.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_url.as_str().trim_end_matches('/'),
            self.config.repository,
            path
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> HostingResult<T> {
        let response = request
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| HostingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HostingError::Api {
                status: status.as_u16(),
                message: format!("{} failed: {}", action, text),
            });
        }

        response
            .json()
            .await
            .map_err(|e| HostingError::Parse(format!("{}: {}", action, e)))
    }
}

/// Percent-encode each segment of a ref path, keeping the separators.
fn encode_ref_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl HostingClient for GitHubClient {
    fn base_branch(&self) -> &str {
        &self.config.base_branch
    }

    async fn fetch_branch_head(&self, branch: &str) -> HostingResult<String> {
        let url = self.url_for(&format!("git/ref/heads/{}", encode_ref_path(branch)));
        debug!(%url, "Fetching branch head");
        let reference: RefResponse = self
            .send(self.client.get(&url), "fetch branch head")
            .await?;
        Ok(reference.object.sha)
    }

    async fn fetch_tree(&self, commit_sha: &str) -> HostingResult<String> {
        let url = self.url_for(&format!("git/commits/{}", commit_sha));
        let commit: CommitResponse = self
            .send(self.client.get(&url), "fetch commit tree")
            .await?;
        Ok(commit.tree.sha)
    }

    async fn create_tree(
        &self,
        base_tree_sha: &str,
        path: &str,
        content: &str,
    ) -> HostingResult<String> {
        let payload = json!({
            "base_tree": base_tree_sha,
            "tree": [{
                "path": path,
                "mode": "100644",
                "type": "blob",
                "content": content,
            }]
        });
        let tree: ShaResponse = self
            .send(
                self.client.post(self.url_for("git/trees")).json(&payload),
                "create tree",
            )
            .await?;
        Ok(tree.sha)
    }

    async fn create_commit(
        &self,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> HostingResult<String> {
        let payload = json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent_sha],
        });
        let commit: ShaResponse = self
            .send(
                self.client.post(self.url_for("git/commits")).json(&payload),
                "create commit",
            )
            .await?;
        Ok(commit.sha)
    }

    async fn create_branch(&self, name: &str, commit_sha: &str) -> HostingResult<String> {
        let payload = json!({
            "ref": format!("refs/heads/{}", name),
            "sha": commit_sha,
        });
        let reference: RefResponse = self
            .send(
                self.client.post(self.url_for("git/refs")).json(&payload),
                "create branch",
            )
            .await?;
        Ok(reference.r#ref)
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        branch_ref: &str,
    ) -> HostingResult<i64> {
        let head = branch_ref.strip_prefix("refs/heads/").unwrap_or(branch_ref);
        let payload = json!({
            "title": title,
            "body": body,
            "head": head,
            "base": self.config.base_branch,
        });
        let pull: PullRequestResponse = self
            .send(
                self.client.post(self.url_for("pulls")).json(&payload),
                "create pull request",
            )
            .await?;
        Ok(pull.number)
    }

    async fn merge_pull_request(&self, number: i64) -> HostingResult<String> {
        let url = self.url_for(&format!("pulls/{}/merge", number));
        let merge: MergeResponse = self
            .send(
                self.client.put(&url).json(&json!({ "merge_method": "merge" })),
                "merge pull request",
            )
            .await?;

        if !merge.merged {
            return Err(HostingError::Api {
                status: 200,
                message: format!(
                    "pull request #{} was not merged: {}",
                    number,
                    merge.message.unwrap_or_default()
                ),
            });
        }
        Ok(merge.sha)
    }
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    r#ref: String,
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: String,
    merged: bool,
    message: Option<String>,
}
