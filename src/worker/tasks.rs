//! Detached background work.
//!
//! Cache refreshes run off the request path. They are handed to a
//! [`TaskExecutor`], which decides when they run and records failures; the
//! request that spawned them never observes the outcome.

use std::sync::Mutex;

use futures::future::BoxFuture;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheStoreError, mutex_lock};
use crate::fetch::FetchError;

const SOURCE: &str = "worker::tasks";
const METRIC_TASK_FAILED: &str = "pwa_cache_background_task_failed_total";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] CacheStoreError),
}

pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// Runs fire-and-forget tasks.
pub trait TaskExecutor: Send + Sync {
    fn submit(&self, name: &'static str, task: TaskFuture);
}

/// Log and count a finished task.
fn record_outcome(name: &'static str, result: &Result<(), TaskError>) {
    match result {
        Ok(()) => debug!(task = name, "background task finished"),
        Err(err) => {
            counter!(METRIC_TASK_FAILED, "task" => name).increment(1);
            warn!(task = name, error = %err, "background task failed");
        }
    }
}

/// Spawns each task on the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl TaskExecutor for TokioExecutor {
    fn submit(&self, name: &'static str, task: TaskFuture) {
        tokio::spawn(async move {
            let result = task.await;
            record_outcome(name, &result);
        });
    }
}

/// Holds tasks until [`DeferredExecutor::run_pending`] is awaited.
///
/// Gives tests a deterministic point at which background refreshes happen.
#[derive(Default)]
pub struct DeferredExecutor {
    queue: Mutex<Vec<(&'static str, TaskFuture)>>,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "pending").len()
    }

    /// Run queued tasks in submission order, including any they submit.
    pub async fn run_pending(&self) -> Vec<(&'static str, Result<(), TaskError>)> {
        let mut outcomes = Vec::new();
        loop {
            let batch = std::mem::take(&mut *mutex_lock(&self.queue, SOURCE, "run_pending"));
            if batch.is_empty() {
                return outcomes;
            }
            for (name, task) in batch {
                let result = task.await;
                record_outcome(name, &result);
                outcomes.push((name, result));
            }
        }
    }
}

impl TaskExecutor for DeferredExecutor {
    fn submit(&self, name: &'static str, task: TaskFuture) {
        mutex_lock(&self.queue, SOURCE, "submit").push((name, task));
    }
}
