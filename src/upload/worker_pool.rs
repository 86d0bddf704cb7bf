//! Bounded worker pool for part uploads
//!
//! Runs at most `concurrency` tasks at a time on the tokio runtime. Tasks
//! are pulled lazily from an iterator, so once a task fails nothing new is
//! started; tasks already running are awaited to completion rather than
//! interrupted mid-write.

use std::future::Future;
use tokio::task::{JoinError, JoinSet};

/// Default number of concurrent part uploads
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Why a pool run stopped early
#[derive(Debug)]
pub enum TaskFailure<E> {
    /// A task returned an error
    Failed(E),
    /// A task panicked or was cancelled by the runtime
    Panicked(JoinError),
}

/// Outcome of a failed pool run
#[derive(Debug)]
pub struct PoolFailure<E> {
    /// First failure observed; later failures are only logged
    pub cause: TaskFailure<E>,
    /// Tasks that were started
    pub started: usize,
    /// Tasks that never started because of the failure
    pub skipped: usize,
}

/// Bounded set of concurrent executors
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl WorkerPool {
    /// Create a pool; a concurrency of 0 is treated as 1
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task, returning their outputs in completion order.
    ///
    /// On the first failure no further tasks are started, running tasks are
    /// drained, and the first failure is returned.
    pub async fn run<I, F, T, E>(&self, tasks: I) -> Result<Vec<T>, PoolFailure<E>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut pending = tasks.into_iter();
        let mut running = JoinSet::new();
        let mut outputs = Vec::new();
        let mut failure: Option<TaskFailure<E>> = None;
        let mut started = 0usize;

        loop {
            while failure.is_none() && running.len() < self.concurrency {
                match pending.next() {
                    Some(task) => {
                        running.spawn(task);
                        started += 1;
                    }
                    None => break,
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            let outcome = match joined {
                Ok(Ok(output)) => {
                    outputs.push(output);
                    continue;
                }
                Ok(Err(err)) => TaskFailure::Failed(err),
                Err(join_err) => TaskFailure::Panicked(join_err),
            };

            if failure.is_none() {
                tracing::debug!(
                    in_flight = running.len(),
                    "Task failed, draining in-flight tasks"
                );
                failure = Some(outcome);
            } else {
                tracing::debug!("Additional task failure while draining");
            }
        }

        match failure {
            None => Ok(outputs),
            Some(cause) => Err(PoolFailure {
                cause,
                started,
                skipped: pending.count(),
            }),
        }
    }
}
