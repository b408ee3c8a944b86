//! Task primitives for strategies: abortable fetches and tracked background work

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::warn;

/// How a raced task ended
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The task finished within the deadline
    Completed(T),
    /// The deadline passed first; the task has been aborted
    TimedOut,
    /// The task was aborted from elsewhere or panicked
    Cancelled,
}

/// A spawned task that is aborted when it loses a race or is dropped
pub struct Cancellable<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Cancellable<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Wait for the task up to `timeout`, aborting it if the deadline wins
    pub async fn race(mut self, timeout: Duration) -> Outcome<T> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(e)) => {
                if e.is_panic() {
                    warn!("Raced task panicked: {}", e);
                }
                Outcome::Cancelled
            }
            Err(_) => {
                self.handle.abort();
                Outcome::TimedOut
            }
        }
    }
}

impl<T> Drop for Cancellable<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Fire-and-forget work that callers can still wait on
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task, reaping any that already finished
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                warn!("Background task failed: {}", e);
            }
        }
        tasks.spawn(future);
    }

    /// Number of tasks not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until every spawned task (including ones spawned meanwhile) finished
    pub async fn settle(&self) {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                if let Err(e) = done {
                    warn!("Background task failed: {}", e);
                }
            }
        }
    }
}
