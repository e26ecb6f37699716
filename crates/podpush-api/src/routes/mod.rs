//! API routes.

pub mod health;
pub mod jobs;
pub mod webhooks;

use crate::AppState;
use axum::Router;
use podpush_db::JobStore;

/// Build the main API router.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: JobStore + Clone + 'static,
{
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

fn api_router<S>() -> Router<AppState<S>>
where
    S: JobStore + Clone + 'static,
{
    Router::new().nest("/jobs", jobs::router())
}
