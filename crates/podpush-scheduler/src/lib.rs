//! Submission pipeline scheduling.
//!
//! The dispatcher claims one runnable job, the pipeline advances it by
//! exactly one step, and the claim is released. Concurrent dispatchers,
//! in this process or others, coordinate only through the job store's row
//! lock. The worker loop drives the dispatcher; external signals from CI and
//! GitHub are applied through [`SignalHandler`].

pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod signals;
pub mod worker;

#[cfg(test)]
mod testing;

pub use dispatcher::Dispatcher;
pub use error::{SchedulerError, SchedulerResult};
pub use pipeline::{SubmissionPipeline, TaskOutcome};
pub use signals::SignalHandler;
pub use worker::Worker;
