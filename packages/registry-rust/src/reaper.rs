//! Background purge of expired operation records.

use std::sync::Arc;

use async_trait::async_trait;
use optrack_core::TrackedOperation;
use tokio::sync::oneshot;

use crate::manager::OperationStore;
use crate::worker::BackgroundRunnable;

/// Requests a running reaper accepts besides its periodic tick.
#[derive(Debug)]
pub enum ReaperTask {
    /// Sweep immediately and report how many records were removed.
    SweepNow { reply: oneshot::Sender<usize> },
}

/// Runnable that sweeps expired records from an [`OperationStore`] on every tick.
pub struct Reaper<R: TrackedOperation> {
    store: Arc<OperationStore<R>>,
}

impl<R: TrackedOperation> Reaper<R> {
    pub(crate) fn new(store: Arc<OperationStore<R>>) -> Self {
        Self { store }
    }

    fn sweep(&self) -> usize {
        let removed = self.store.cleanup_expired();
        if removed > 0 {
            tracing::debug!(removed, "cleaned up expired operations");
        }
        removed
    }
}

#[async_trait]
impl<R: TrackedOperation> BackgroundRunnable for Reaper<R> {
    type Task = ReaperTask;

    async fn run(&mut self, task: ReaperTask) {
        match task {
            ReaperTask::SweepNow { reply } => {
                let removed = self.sweep();
                // The requester may have given up waiting.
                let _ = reply.send(removed);
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        tracing::debug!(remaining = self.store.len(), "reaper stopped");
    }
}
