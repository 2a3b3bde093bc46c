use crate::error::JobError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed-size worker capacity per instance. A job waits a bounded time
/// for a slot and then fails with Unavailable instead of queueing
/// indefinitely; holding the permit for the job's lifetime is what
/// bounds concurrent generation.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    dispatch_wait: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, dispatch_wait: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size.max(1))),
            dispatch_wait,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, JobError> {
        match tokio::time::timeout(self.dispatch_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(JobError::Unavailable),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Cooperative stop line for one running job: the orchestrator raises
/// the flag, the worker loop observes it at its next await point, and
/// a watchdog forces the terminal transition if the acknowledgement
/// never comes.
pub struct StopSignal {
    tx: tokio::sync::watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> (Self, tokio::sync::watch::Receiver<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn raise(&self) {
        let _ = self.tx.send(true);
    }
}
