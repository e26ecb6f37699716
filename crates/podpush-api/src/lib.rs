//! HTTP service for the pod submission pipeline.
//!
//! Operators submit and inspect jobs; Travis CI and GitHub report build
//! results and merges through webhooks.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
