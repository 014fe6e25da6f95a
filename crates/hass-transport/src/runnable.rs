//! Uniform lifecycle for long-running components.

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::TransportResult;

/// A component a controller starts and stops together with its siblings.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Start background work. Calling it on a started component is a no-op.
    async fn start(&self) -> TransportResult<()>;

    /// Stop background work and wait for it. Idempotent.
    async fn stop(&self);

    fn name(&self) -> &str;
}

/// Start every runnable in order, stopping the already started ones again if
/// one of them fails.
pub async fn start_all(runnables: &[&dyn Runnable]) -> TransportResult<()> {
    for (index, runnable) in runnables.iter().enumerate() {
        if let Err(e) = runnable.start().await {
            error!(name = runnable.name(), error = %e, "failed to start");
            for started in runnables[..index].iter().rev() {
                started.stop().await;
            }
            return Err(e);
        }
        info!(name = runnable.name(), "started");
    }
    Ok(())
}

/// Stop every runnable in reverse start order.
pub async fn stop_all(runnables: &[&dyn Runnable]) {
    for runnable in runnables.iter().rev() {
        runnable.stop().await;
        info!(name = runnable.name(), "stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::TransportError;

    struct Recorder<'a> {
        name: &'static str,
        fail: bool,
        log: &'a Mutex<Vec<String>>,
    }

    #[async_trait]
    impl<'a> Runnable for Recorder<'a> {
        async fn start(&self) -> TransportResult<()> {
            if self.fail {
                return Err(TransportError::config("boom"));
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_stop_all_runs_in_reverse_order() {
        let log = Mutex::new(Vec::new());
        let a = Recorder { name: "a", fail: false, log: &log };
        let b = Recorder { name: "b", fail: false, log: &log };

        start_all(&[&a, &b]).await.unwrap();
        stop_all(&[&a, &b]).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let log = Mutex::new(Vec::new());
        let a = Recorder { name: "a", fail: false, log: &log };
        let b = Recorder { name: "b", fail: true, log: &log };

        let err = start_all(&[&a, &b]).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(*log.lock().unwrap(), vec!["start a", "stop a"]);
    }
}
