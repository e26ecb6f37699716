//! Worker loop that drives the dispatcher.

use podpush_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

/// Longest wait after repeated dispatcher errors, in poll intervals.
const MAX_BACKOFF_FACTOR: u32 = 16;

/// Calls the dispatcher until told to stop.
pub struct Worker<S: JobStore> {
    id: String,
    dispatcher: Arc<Dispatcher<S>>,
    poll_interval: Duration,
}

impl<S: JobStore> Worker<S> {
    pub fn new(id: impl Into<String>, dispatcher: Arc<Dispatcher<S>>, poll_interval: Duration) -> Self {
        Self {
            id: id.into(),
            dispatcher,
            poll_interval,
        }
    }

    /// Run passes back to back while there is work, sleep `poll_interval`
    /// when there is none, and back off on errors. Returns once `shutdown`
    /// turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");
        let mut failures: u32 = 0;

        while !*shutdown.borrow() {
            let delay = match self.dispatcher.perform_task().await {
                Ok(true) => {
                    failures = 0;
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(false) => {
                    failures = 0;
                    self.poll_interval
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff(failures);
                    warn!(worker_id = %self.id, error = %e, failures, ?delay, "Dispatcher pass failed");
                    delay
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = (1u32 << failures.min(4)).min(MAX_BACKOFF_FACTOR);
        self.poll_interval.saturating_mul(factor)
    }
}
