//! Retrying cleanup dispatch.
//!
//! Pipeline failures hand their teardown to the queue and return to the
//! caller immediately. Each request runs on its own task: it takes the
//! instance's name lock, runs a full teardown, and retries incomplete
//! teardowns with exponential backoff. Requests that exhaust their attempts
//! are logged at error level and published on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use dockyard_core::config::CleanupSettings;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::cleanup::{CleanupCoordinator, CleanupReport, CleanupTarget};

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A teardown requested after a failed provisioning attempt.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    pub target: CleanupTarget,
    /// The error that triggered the cleanup.
    pub reason: String,
}

/// A cleanup that gave up.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub target: CleanupTarget,
    pub reason: String,
    pub attempts: u32,
    pub last_report: CleanupReport,
}

#[derive(Clone)]
pub struct CleanupQueue {
    coordinator: Arc<CleanupCoordinator>,
    settings: CleanupSettings,
    failures: broadcast::Sender<CleanupFailure>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl CleanupQueue {
    pub fn new(coordinator: Arc<CleanupCoordinator>, settings: CleanupSettings) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let (in_flight, _) = watch::channel(0usize);
        Self {
            coordinator,
            settings,
            failures,
            in_flight: Arc::new(in_flight),
        }
    }

    pub fn coordinator(&self) -> &Arc<CleanupCoordinator> {
        &self.coordinator
    }

    /// Receive cleanups that exhausted their attempts.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<CleanupFailure> {
        self.failures.subscribe()
    }

    /// Number of cleanups not finished yet.
    pub fn pending(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Schedule a teardown. Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: CleanupRequest) {
        info!(
            name = %request.target.name,
            kind = %request.target.kind,
            reason = %request.reason,
            "cleanup enqueued"
        );
        self.in_flight.send_modify(|n| *n += 1);
        let done = InFlight(self.in_flight.clone());
        let queue = self.clone();
        tokio::spawn(async move {
            let _done = done;
            queue.run(request).await;
        });
    }

    /// Wait until every enqueued cleanup has finished.
    pub async fn flush(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    async fn run(&self, request: CleanupRequest) {
        let target = &request.target;
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let report = {
                let _guard = self.coordinator.locks().lock(&target.container).await;
                self.coordinator.teardown_target(target).await
            };

            if report.is_complete() {
                info!(name = %target.name, kind = %target.kind, attempt, "cleanup complete");
                return;
            }

            if attempt >= self.settings.max_attempts {
                error!(
                    name = %target.name,
                    kind = %target.kind,
                    attempts = attempt,
                    failed = ?report.failed_steps(),
                    reason = %request.reason,
                    "cleanup gave up"
                );
                // No subscribers is fine; the error log is the record.
                let _ = self.failures.send(CleanupFailure {
                    target: target.clone(),
                    reason: request.reason.clone(),
                    attempts: attempt,
                    last_report: report,
                });
                return;
            }

            warn!(
                name = %target.name,
                attempt,
                failed = ?report.failed_steps(),
                retry_in = ?backoff,
                "cleanup incomplete, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff, self.settings.max_backoff);
        }
    }
}

/// Marks one cleanup finished when dropped, including when its task
/// panics or is cancelled.
struct InFlight(Arc<watch::Sender<usize>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_cleanup_still_counts_as_finished() {
        let (tx, _) = watch::channel(1usize);
        let tx = Arc::new(tx);
        let done = InFlight(tx.clone());
        let task = tokio::spawn(async move {
            let _done = done;
            panic!("cleanup task crashed");
        });
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(*tx.borrow(), 0);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(30);
        let mut b = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(b.as_secs());
            b = next_backoff(b, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}
