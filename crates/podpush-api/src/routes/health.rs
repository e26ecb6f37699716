//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use podpush_db::JobStore;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router<S>() -> Router<AppState<S>>
where
    S: JobStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready::<S>))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready<S>(State(state): State<AppState<S>>) -> Result<Json<Value>, ApiError>
where
    S: JobStore + Clone + 'static,
{
    if let Some(pool) = &state.pool {
        podpush_db::ping(pool)
            .await
            .map_err(|e| ApiError::Unavailable(format!("database unavailable: {}", e)))?;
    }
    Ok(Json(json!({ "status": "ready" })))
}
