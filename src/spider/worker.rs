use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::error;

/// Handle to one supervised execution unit.
///
/// The failure flag is written exactly once, by the task itself when its
/// loop returns an error. The supervisor only reads it, so replacing a
/// worker never races the worker's own bookkeeping. A worker that merely
/// runs slowly is never reported failed; this is crash recovery, not
/// hang recovery.
pub struct WorkerHandle {
    name: String,
    failed: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `task` under `name`. A returned error marks the handle
    /// failed and ends the task; it never propagates to siblings.
    pub fn spawn<F>(name: &str, task: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let failed = Arc::new(AtomicBool::new(false));
        let flag = failed.clone();
        let task_name = name.to_string();

        let join = tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(worker = %task_name, "worker terminated: {:#}", e);
                flag.store(true, Ordering::SeqCst);
            }
        });

        Self {
            name: name.to_string(),
            failed,
            join,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Wait for the task to finish. Used only during shutdown.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Sleep that wakes early when the shutdown signal flips. Returns true
/// when the caller should stop instead of continuing its loop.
pub async fn sleep_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}
