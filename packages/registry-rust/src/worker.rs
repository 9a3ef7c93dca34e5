//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the task channel feeding a worker.
const TASK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called once per tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Calls `BackgroundRunnable::on_tick()` once per interval, the first one
///    a full interval after start
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
///
/// A task or tick already in progress when `stop()` is called runs to
/// completion; nothing runs after `stop()` returns. Dropping a running worker
/// without `stop()` aborts the task.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable and tick interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Returns `true` until `stop()` is called or the worker task exits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Submit a task to the worker, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Submit a task without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or the channel is full.
    pub fn try_submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .try_send(task)
                .map_err(|e| anyhow::anyhow!("worker rejected task: {e}")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        // Signal shutdown.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Close the task channel.
        self.tx.take();
        // Wait for the worker task to finish.
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!("background worker panicked: {e}");
                }
            }
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
