//! Reachability check for a pod's declared source.
//!
//! Submissions whose source cannot be fetched by anyone are refused before a
//! job is created. Each check runs under a time limit and a check that runs
//! out of time counts as unreachable.

use std::process::Stdio;
use std::time::Duration;

use podpush_core::SpecSource;
use reqwest::StatusCode;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const USER_AGENT: &str = "podpush";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SourceCheck {
    client: reqwest::Client,
    timeout: Duration,
}

impl SourceCheck {
    pub fn new(limit: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            timeout: limit,
        })
    }

    /// Whether the source can be fetched publicly. Sources that are neither
    /// HTTP archives nor git repositories are not checked.
    pub async fn is_publicly_accessible(&self, source: Option<&SpecSource>) -> bool {
        let check = async {
            match source {
                Some(SpecSource::Http(url)) => self.http_reachable(url).await,
                Some(SpecSource::Git { url, reference }) => git_reachable(url, reference).await,
                Some(SpecSource::Other) | None => true,
            }
        };

        match timeout(self.timeout, check).await {
            Ok(reachable) => reachable,
            Err(_) => {
                warn!(?source, timeout = ?self.timeout, "Source check timed out");
                false
            }
        }
    }

    async fn http_reachable(&self, url: &str) -> bool {
        let response = match self.client.head(url).send().await {
            Ok(r) if r.status() == StatusCode::METHOD_NOT_ALLOWED => {
                self.client.get(url).send().await
            }
            other => other,
        };

        match response {
            Ok(r) => {
                debug!(url, status = %r.status(), "Checked HTTP source");
                r.status().is_success()
            }
            Err(e) => {
                debug!(url, error = %e, "HTTP source unreachable");
                false
            }
        }
    }
}

async fn git_reachable(url: &str, reference: &str) -> bool {
    let status = Command::new("git")
        .args(["ls-remote", url, reference])
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) => {
            debug!(url, reference, %status, "Checked git source");
            status.success()
        }
        Err(e) => {
            warn!(url, error = %e, "Failed to run git ls-remote");
            false
        }
    }
}
