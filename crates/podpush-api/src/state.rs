//! Application state.

use podpush_config::SystemConfig;
use podpush_core::Registry;
use podpush_db::JobStore;
use podpush_scheduler::SignalHandler;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState<S: JobStore + Clone> {
    pub store: S,
    pub registry: Arc<dyn Registry>,
    pub signals: Arc<SignalHandler<S>>,
    /// `owner/name` of the index repository; webhooks for others are ignored.
    pub repository: String,
    pub travis_token: Option<String>,
    pub github_secret: Option<String>,
    /// Pinged by the readiness check when present.
    pub pool: Option<PgPool>,
}

impl<S: JobStore + Clone> AppState<S> {
    pub fn new(store: S, registry: Arc<dyn Registry>, config: &SystemConfig) -> Self {
        let signals = Arc::new(SignalHandler::new(store.clone()));
        Self {
            store,
            registry,
            signals,
            repository: config.github.repository.clone(),
            travis_token: config.webhooks.travis_token.clone(),
            github_secret: config.webhooks.github_secret.clone(),
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
