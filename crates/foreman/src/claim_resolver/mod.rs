//! Background claim-expiration resolver.
//!
//! A worker claiming a run promises to reassert ownership before the run's
//! `taken_until` lease deadline. When the worker disappears instead, an
//! advisory message becomes visible on the claim queue at the lease deadline;
//! this task resolves the abandoned run as `exception/claim-expired` and,
//! while retry budget remains, schedules a fresh pending run.

mod handler;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error, info, warn};

use crate::backends::{
    BackendError, ClaimQueue, DependencyTracker, EventPublisher, PendingQueue, TaskStore,
};
use crate::telemetry::Monitor;

/// Configuration for the claim resolver task.
#[derive(Debug, Clone)]
pub struct ClaimResolverConfig {
    /// Idle gap between poll iterations.
    pub polling_delay: Duration,
    /// Concurrent poll loops per iteration.
    pub parallelism: usize,
    /// Consecutive iteration failures tolerated before giving up.
    pub max_failures: u32,
    /// Hard wall-clock bound on one iteration.
    pub max_iteration_time: Duration,
}

impl Default for ClaimResolverConfig {
    fn default() -> Self {
        Self {
            polling_delay: Duration::from_secs(5),
            parallelism: 4,
            max_failures: 10,
            max_iteration_time: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("claim resolver failed {failures} consecutive iterations")]
    TooManyFailures { failures: u32 },
    #[error("claim resolver task panicked: {0}")]
    Panicked(String),
}

/// Handle to a started resolver.
pub struct ClaimResolverHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ResolverError>>,
}

impl ClaimResolverHandle {
    /// Token that cancels the resolver when triggered.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown without waiting for the current iteration.
    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Request shutdown and wait for the loop to wind down.
    pub async fn shutdown(self) -> Result<(), ResolverError> {
        self.trigger_shutdown();
        self.join().await
    }

    /// Wait for the loop to finish on its own.
    pub async fn join(self) -> Result<(), ResolverError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(ResolverError::Panicked(err.to_string())),
        }
    }
}

/// Background claim-expiration resolver task.
pub struct ClaimResolver<B> {
    backend: B,
    monitor: Arc<dyn Monitor>,
    config: ClaimResolverConfig,
}

impl<B> ClaimResolver<B>
where
    B: TaskStore
        + ClaimQueue
        + PendingQueue
        + EventPublisher
        + DependencyTracker
        + Clone
        + Send
        + Sync
        + 'static,
{
    pub fn new(backend: B, monitor: Arc<dyn Monitor>, config: ClaimResolverConfig) -> Self {
        Self {
            backend,
            monitor,
            config,
        }
    }

    /// Spawn the resolver loop.
    pub fn start(self) -> ClaimResolverHandle {
        let shutdown = CancellationToken::new();
        let cancelled = shutdown.clone().cancelled_owned();
        let handle = tokio::spawn(self.run(cancelled));
        ClaimResolverHandle { shutdown, handle }
    }

    /// Run the resolver loop until shutdown or failure escalation.
    ///
    /// Cancellation is honoured between iterations, never mid-message, so an
    /// in-flight resolution either completes or is redelivered whole.
    pub async fn run(self, shutdown: WaitForCancellationFutureOwned) -> Result<(), ResolverError> {
        info!(
            polling_delay_ms = self.config.polling_delay.as_millis(),
            parallelism = self.config.parallelism,
            max_failures = self.config.max_failures,
            max_iteration_time_ms = self.config.max_iteration_time.as_millis(),
            "claim resolver started"
        );

        let mut shutdown = std::pin::pin!(shutdown);
        let mut consecutive_failures = 0u32;

        loop {
            match timeout(self.config.max_iteration_time, self.poll_once()).await {
                Ok(Ok(())) => {
                    consecutive_failures = 0;
                }
                Ok(Err(err)) => {
                    consecutive_failures += 1;
                    metrics::counter!("foreman_resolver_iteration_failures_total").increment(1);
                    warn!(
                        error = %err,
                        consecutive_failures,
                        "claim resolver iteration failed"
                    );
                }
                Err(_) => {
                    consecutive_failures += 1;
                    metrics::counter!("foreman_resolver_iteration_failures_total").increment(1);
                    warn!(
                        max_iteration_time_ms = self.config.max_iteration_time.as_millis(),
                        consecutive_failures,
                        "claim resolver iteration timed out"
                    );
                }
            }

            if consecutive_failures >= self.config.max_failures {
                let message = format!(
                    "claim resolver failed {consecutive_failures} consecutive iterations; terminating"
                );
                self.monitor.alert(&message);
                error!(failures = consecutive_failures, "claim resolver giving up");
                return Err(ResolverError::TooManyFailures {
                    failures: consecutive_failures,
                });
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("claim resolver shutting down");
                    return Ok(());
                }
                _ = sleep(self.config.polling_delay) => {}
            }
        }
    }

    /// One iteration: `parallelism` poll loops, run to completion.
    async fn poll_once(&self) -> Result<(), BackendError> {
        let polls = (0..self.config.parallelism).map(|_| self.poll_loop());
        join_all(polls).await.into_iter().collect()
    }

    /// Poll one batch of advisory messages and handle them concurrently.
    ///
    /// Handler failures are logged per message and the message is left
    /// unacknowledged, so the queue redelivers it after its invisibility
    /// window. Only a failing poll call aborts the loop. Every batch emits
    /// one telemetry record, empty batches included, so an idle poller is
    /// still observable.
    async fn poll_loop(&self) -> Result<(), BackendError> {
        let messages = self.backend.poll_claim_queue().await?;
        let received = messages.len();
        let handled = messages.into_iter().map(|message| {
            let task_id = message.task_id;
            let run_id = message.run_id;
            async move {
                handler::handle_message(&self.backend, self.monitor.as_ref(), message)
                    .await
                    .map_err(|err| (task_id, run_id, err))
            }
        });

        let mut failed = 0usize;
        for (task_id, run_id, err) in join_all(handled).await.into_iter().filter_map(Result::err) {
            failed += 1;
            warn!(
                task_id = %task_id,
                run_id,
                error = %err,
                "failed to resolve expired claim; message will be redelivered"
            );
        }

        metrics::counter!("foreman_claim_messages_total").increment(received as u64);
        metrics::counter!("foreman_claim_messages_failed_total").increment(failed as u64);
        debug!(
            messages = received,
            failed,
            resolver = "claim",
            "polled claim expiration queue"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use foreman_backend_fault_injection::FaultInjectingBackend;

    use super::*;
    use crate::backends::MemoryBackend;
    use crate::telemetry::test_support::CaptureMonitor;

    fn fast_config(max_failures: u32) -> ClaimResolverConfig {
        ClaimResolverConfig {
            polling_delay: Duration::from_millis(10),
            parallelism: 2,
            max_failures,
            max_iteration_time: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn shuts_down_cleanly_while_idle() {
        let backend = MemoryBackend::new();
        let monitor = CaptureMonitor::default();
        let resolver = ClaimResolver::new(backend, Arc::new(monitor.clone()), fast_config(10));

        let handle = resolver.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await.expect("clean shutdown");

        assert!(monitor.alerts().is_empty());
    }

    #[tokio::test]
    async fn escalates_after_consecutive_poll_failures() {
        let backend = FaultInjectingBackend::with_poll_failures(MemoryBackend::new());
        let monitor = CaptureMonitor::default();
        let resolver =
            ClaimResolver::new(backend.clone(), Arc::new(monitor.clone()), fast_config(3));

        let handle = resolver.start();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("resolver should give up promptly");

        assert!(matches!(
            result,
            Err(ResolverError::TooManyFailures { failures: 3 })
        ));
        assert_eq!(monitor.alerts().len(), 1);
        assert!(backend.poll_calls() >= 3);
    }

    #[tokio::test]
    async fn counts_timed_out_iterations_as_failures() {
        let backend = FaultInjectingBackend::with_hanging_polls(MemoryBackend::new());
        let monitor = CaptureMonitor::default();
        let config = ClaimResolverConfig {
            polling_delay: Duration::from_millis(5),
            parallelism: 1,
            max_failures: 2,
            max_iteration_time: Duration::from_millis(30),
        };
        let resolver = ClaimResolver::new(backend, Arc::new(monitor.clone()), config);

        let handle = resolver.start();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("resolver should give up promptly");

        assert!(matches!(
            result,
            Err(ResolverError::TooManyFailures { failures: 2 })
        ));
        assert_eq!(monitor.alerts().len(), 1);
    }

    #[tokio::test]
    async fn failure_counter_resets_on_success() {
        let backend = FaultInjectingBackend::with_poll_failures(MemoryBackend::new());
        let monitor = CaptureMonitor::default();
        let resolver =
            ClaimResolver::new(backend.clone(), Arc::new(monitor.clone()), fast_config(3));

        let handle = resolver.start();

        // Let two iterations fail, then heal the backend before the third.
        while backend.poll_calls() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        backend.set_poll_failures(false);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monitor.alerts().is_empty(), "resolver should have recovered");
        handle.shutdown().await.expect("clean shutdown");
    }
}
