//! Webhook endpoints for CI and GitHub.
//!
//! Travis CI reports the build result of each submission pull request, which
//! either releases the job to merge or fails it. GitHub reports pull requests
//! merged by hand so the job can be closed and the version published.

use axum::body::Bytes;
use axum::extract::{Form, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use podpush_core::SubmissionJob;
use podpush_db::{DbError, JobStore};
use podpush_scheduler::{SchedulerError, SchedulerResult};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router<S>() -> Router<AppState<S>>
where
    S: JobStore + Clone + 'static,
{
    Router::new()
        .route("/travis", post(travis_webhook::<S>))
        .route("/github", post(github_webhook::<S>))
}

/// Travis posts its notification as a form with one JSON `payload` field.
#[derive(Debug, Deserialize)]
pub struct TravisForm {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct TravisPayload {
    #[serde(rename = "type")]
    kind: String,
    /// 0 when the build passed; null while it is pending or running.
    result: Option<i64>,
    pull_request_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequest,
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: i64,
    #[serde(default)]
    merged: bool,
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

async fn travis_webhook<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Form(form): Form<TravisForm>,
) -> Result<Json<Value>, ApiError>
where
    S: JobStore + Clone + 'static,
{
    let Some(token) = state.travis_token.as_deref() else {
        return Err(ApiError::Unauthorized(
            "Travis notifications are not configured".to_string(),
        ));
    };
    let authorization = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok());
    if !verify_travis_authorization(&state.repository, token, authorization) {
        warn!("Invalid Travis authorization");
        return Err(ApiError::Unauthorized("invalid authorization".to_string()));
    }

    let payload: TravisPayload = serde_json::from_str(&form.payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))?;

    if payload.kind != "pull_request" {
        return Ok(ignored(format!("{} builds are not tracked", payload.kind)));
    }
    let Some(number) = payload.pull_request_number else {
        return Err(ApiError::BadRequest(
            "pull request build without pull_request_number".to_string(),
        ));
    };

    let Some(result) = payload.result else {
        return Ok(ignored(format!(
            "build for pull request #{} has not finished",
            number
        )));
    };
    let success = result == 0;
    info!(pull_request = number, success, "Received Travis build result");
    signal_outcome(state.signals.record_build_result(number, success).await)
}

async fn github_webhook<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    S: JobStore + Clone + 'static,
{
    let Some(secret) = state.github_secret.as_deref() else {
        return Err(ApiError::Unauthorized(
            "GitHub webhooks are not configured".to_string(),
        ));
    };
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_github_signature(secret, &body, signature) {
        warn!("Invalid GitHub webhook signature");
        return Err(ApiError::Unauthorized("invalid signature".to_string()));
    }

    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    if event_type != "pull_request" {
        info!(event = %event_type, "Unhandled event type");
        return Ok(ignored(format!("{} events are not handled", event_type)));
    }

    let event: PullRequestEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    if let Some(repository) = &event.repository {
        if repository.full_name != state.repository {
            return Ok(ignored(format!("{} is not the index repository", repository.full_name)));
        }
    }

    let pull = event.pull_request;
    match (event.action.as_str(), pull.merged, pull.merge_commit_sha) {
        ("closed", true, Some(sha)) => {
            info!(pull_request = pull.number, sha = %sha, "Pull request merged");
            signal_outcome(state.signals.record_merge(pull.number, &sha).await)
        }
        (action, _, _) => Ok(ignored(format!("pull request {} not merged", action))),
    }
}

fn ignored(reason: String) -> Json<Value> {
    Json(json!({ "status": "ignored", "reason": reason }))
}

/// Unknown pull requests and jobs that already finished are not errors for
/// the sender; both happen routinely.
fn signal_outcome(result: SchedulerResult<SubmissionJob>) -> Result<Json<Value>, ApiError> {
    match result {
        Ok(job) => Ok(Json(json!({ "status": "recorded", "job_id": job.id }))),
        Err(SchedulerError::Store(DbError::NotFound(msg))) => {
            info!(reason = %msg, "Signal for unknown job");
            Ok(ignored(msg))
        }
        Err(SchedulerError::Store(DbError::Domain(podpush_core::Error::Conflict(msg)))) => {
            info!(reason = %msg, "Signal for finished job");
            Ok(ignored(msg))
        }
        Err(e) => Err(e.into()),
    }
}

/// Travis signs notifications with `sha256(repo_slug + token)` in hex.
fn verify_travis_authorization(repo_slug: &str, token: &str, authorization: Option<&str>) -> bool {
    let Some(authorization) = authorization else {
        return false;
    };
    let expected = hex::encode(Sha256::digest(format!("{}{}", repo_slug, token)));
    authorization.eq_ignore_ascii_case(&expected)
}

/// Verify GitHub webhook signature (HMAC-SHA256).
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use podpush_config::SystemConfig;
    use podpush_core::{JobChange, PodVersionInfo, ResourceId};
    use podpush_db::{MemoryJobStore, MemoryRegistry};
    use std::sync::Arc;
    use tower::ServiceExt;

    const REPO: &str = "CocoaPods/Specs";
    const TRAVIS_TOKEN: &str = "travis-token";
    const GITHUB_SECRET: &str = "github-secret";

    struct Harness {
        store: MemoryJobStore,
        registry: MemoryRegistry,
        version: PodVersionInfo,
        job_id: ResourceId,
    }

    impl Harness {
        /// A job whose pull request #42 is open and waiting on CI.
        fn new() -> Self {
            let registry = MemoryRegistry::new();
            let store = MemoryJobStore::with_registry(registry.clone());
            let version = registry.register("AFNetworking", "1.2.0", "https://example.com", "{}");

            let mut job = SubmissionJob::new(version.id);
            for change in [
                JobChange::BaseCommit("c0".into()),
                JobChange::BaseTree("t0".into()),
                JobChange::NewTree("t1".into()),
                JobChange::NewCommit("c1".into()),
                JobChange::Branch("refs/heads/AFNetworking-1.2.0".into()),
                JobChange::PullRequest(42),
            ] {
                job.apply(change).unwrap();
            }
            let job_id = job.id;
            store.insert(job);

            Self {
                store,
                registry,
                version,
                job_id,
            }
        }

        fn config() -> SystemConfig {
            let mut config = SystemConfig::default();
            config.github.repository = REPO.to_string();
            config.webhooks.travis_token = Some(TRAVIS_TOKEN.to_string());
            config.webhooks.github_secret = Some(GITHUB_SECRET.to_string());
            config
        }

        fn app(&self) -> axum::Router {
            self.app_with(&Self::config())
        }

        fn app_with(&self, config: &SystemConfig) -> axum::Router {
            routes::router(AppState::new(
                self.store.clone(),
                Arc::new(self.registry.clone()),
                config,
            ))
        }

        async fn job(&self) -> SubmissionJob {
            self.store.get(self.job_id).await.unwrap()
        }
    }

    fn travis_request(authorization: &str, payload: Value) -> Request<Body> {
        let body = format!(
            "payload={}",
            urlencoding::encode(&payload.to_string())
        );
        Request::post("/webhooks/travis")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("Authorization", authorization)
            .body(Body::from(body))
            .unwrap()
    }

    fn travis_authorization() -> String {
        hex::encode(Sha256::digest(format!("{}{}", REPO, TRAVIS_TOKEN)))
    }

    fn github_request(event: &str, payload: Value) -> Request<Body> {
        let body = payload.to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(GITHUB_SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        Request::post("/webhooks/github")
            .header("content-type", "application/json")
            .header("X-GitHub-Event", event)
            .header("X-Hub-Signature-256", signature)
            .body(Body::from(body))
            .unwrap()
    }

    fn merged_event(number: i64) -> Value {
        json!({
            "action": "closed",
            "pull_request": { "number": number, "merged": true, "merge_commit_sha": "m9" },
            "repository": { "full_name": REPO }
        })
    }

    #[tokio::test]
    async fn test_travis_pass_releases_job() {
        let harness = Harness::new();
        let payload = json!({ "type": "pull_request", "result": 0, "pull_request_number": 42 });

        let response = harness
            .app()
            .oneshot(travis_request(&travis_authorization(), payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let job = harness.job().await;
        assert_eq!(job.travis_build_success, Some(true));
        assert!(job.needs_to_perform_work);
    }

    #[tokio::test]
    async fn test_travis_failure_fails_job() {
        let harness = Harness::new();
        let payload = json!({ "type": "pull_request", "result": 1, "pull_request_number": 42 });

        let response = harness
            .app()
            .oneshot(travis_request(&travis_authorization(), payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let job = harness.job().await;
        assert!(job.failed());
        assert!(!job.needs_to_perform_work);
    }

    #[tokio::test]
    async fn test_travis_rejects_bad_authorization() {
        let harness = Harness::new();
        let payload = json!({ "type": "pull_request", "result": 0, "pull_request_number": 42 });

        let response = harness
            .app()
            .oneshot(travis_request("not-the-digest", payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(harness.job().await.travis_build_success, None);
    }

    #[tokio::test]
    async fn test_travis_push_build_ignored() {
        let harness = Harness::new();
        let payload = json!({ "type": "push", "result": 1 });

        let response = harness
            .app()
            .oneshot(travis_request(&travis_authorization(), payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(harness.job().await.in_progress());
    }

    #[tokio::test]
    async fn test_travis_pending_build_ignored() {
        let harness = Harness::new();
        let payload = json!({ "type": "pull_request", "result": null, "pull_request_number": 42 });

        let response = harness
            .app()
            .oneshot(travis_request(&travis_authorization(), payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let job = harness.job().await;
        assert!(job.in_progress());
        assert_eq!(job.travis_build_success, None);
        assert!(!job.needs_to_perform_work);
    }

    #[tokio::test]
    async fn test_github_refused_without_secret() {
        let harness = Harness::new();
        let mut config = Harness::config();
        config.webhooks.github_secret = None;
        let request = Request::post("/webhooks/github")
            .header("content-type", "application/json")
            .header("X-GitHub-Event", "pull_request")
            .body(Body::from(merged_event(42).to_string()))
            .unwrap();

        let response = harness.app_with(&config).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let job = harness.job().await;
        assert!(job.in_progress());
        assert!(job.merge_commit_sha.is_none());
        assert!(!harness.registry.is_published(harness.version.id));
    }

    #[tokio::test]
    async fn test_github_merge_publishes() {
        let harness = Harness::new();

        let response = harness
            .app()
            .oneshot(github_request("pull_request", merged_event(42)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let job = harness.job().await;
        assert!(job.completed());
        assert_eq!(job.merge_commit_sha.as_deref(), Some("m9"));
        assert!(harness.registry.is_published(harness.version.id));
    }

    #[tokio::test]
    async fn test_github_merge_of_finished_job_is_ignored() {
        let harness = Harness::new();
        harness.app().oneshot(github_request("pull_request", merged_event(42))).await.unwrap();

        let response = harness
            .app()
            .oneshot(github_request("pull_request", merged_event(42)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn test_github_rejects_bad_signature() {
        let harness = Harness::new();
        let request = Request::post("/webhooks/github")
            .header("X-GitHub-Event", "pull_request")
            .header("X-Hub-Signature-256", "sha256=00")
            .body(Body::from(merged_event(42).to_string()))
            .unwrap();

        let response = harness.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(harness.job().await.in_progress());
    }

    #[tokio::test]
    async fn test_github_unmerged_close_ignored() {
        let harness = Harness::new();
        let event = json!({
            "action": "closed",
            "pull_request": { "number": 42, "merged": false, "merge_commit_sha": null },
            "repository": { "full_name": REPO }
        });

        let response = harness
            .app()
            .oneshot(github_request("pull_request", event))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(harness.job().await.in_progress());
    }

    #[test]
    fn test_verify_github_signature() {
        let secret = "test-secret";
        let body = b"test body";

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_github_signature(secret, body, Some(&signature)));
        assert!(!verify_github_signature(secret, body, Some("sha256=invalid")));
        assert!(!verify_github_signature(secret, body, None));
    }
}
