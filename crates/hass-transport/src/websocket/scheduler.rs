//! Delayed re-submission of requests.

use std::time::Duration;

use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace};

use super::{pending::Request, ws_client::Inner};

/// Shutdown signal and task set of one `start()`/`stop()` cycle.
#[derive(Clone, Debug, Default)]
pub(crate) struct RunContext {
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

impl RunContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn an ephemeral task that is dropped as soon as the run is
    /// cancelled.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = future => {}
            }
        });
    }
}

/// Put `request` back on the outbound queue after `delay`.
///
/// Never blocks the caller. When the client is not running the request is
/// dropped; a pending delay is abandoned once the client stops.
pub(crate) fn schedule(inner: &Inner, request: Request, delay: Duration) {
    let Some(run) = inner.run_context() else {
        debug!(id = %request.id(), "client not running, dropping requeue");
        return;
    };
    let queue = inner.queue_sender();
    run.spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        trace!(id = %request.id(), ?delay, "requeueing request");
        let _ = queue.send(request).await;
    });
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn test_spawned_task_is_dropped_on_cancel() {
        let run = RunContext::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        run.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        run.cancel.cancel();
        run.tasks.close();
        tokio::time::timeout(Duration::from_secs(1), run.tasks.wait())
            .await
            .unwrap();
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawned_task_runs_to_completion() {
        let run = RunContext::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        run.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        });

        run.tasks.close();
        run.tasks.wait().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
