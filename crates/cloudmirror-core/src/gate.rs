//! Bounded fan-out of workers that fail together
//!
//! Every worker runs to completion even when a sibling fails; the first
//! error (by completion time) is what the caller sees.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of workers running at once
pub const DEFAULT_CONCURRENCY: usize = 10;

/// A worker that panicked, or was torn down by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure(pub String);

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Results of a gated fan-out
#[derive(Debug)]
pub struct GateResults<T, E> {
    /// One result per item, in item order
    pub results: Vec<Result<T, E>>,

    /// Index of the item whose error completed first
    pub first_error: Option<usize>,
}

impl<T, E> GateResults<T, E> {
    /// Successful values in item order, or the first error
    pub fn into_result(self) -> Result<Vec<T>, E> {
        let mut values = Vec::with_capacity(self.results.len());
        let mut first = None;
        for (index, result) in self.results.into_iter().enumerate() {
            match result {
                Ok(value) => values.push(value),
                Err(e) if Some(index) == self.first_error => first = Some(e),
                Err(_) => {}
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

/// Shared throttle on simultaneous workers
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `worker` over every item under the gate's limit
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, worker: F) -> Result<Vec<T>, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: From<WorkerFailure> + Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.spawn_all(items, None, worker).await.into_result()
    }

    /// Like [`run`](Self::run), additionally capped at `max` workers
    pub async fn run_bounded<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        max: usize,
        worker: F,
    ) -> Result<Vec<T>, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: From<WorkerFailure> + Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let local = Arc::new(Semaphore::new(max.max(1)));
        self.spawn_all(items, Some(local), worker)
            .await
            .into_result()
    }

    /// Run every worker and keep every result
    pub async fn run_collect<I, T, E, F, Fut>(&self, items: Vec<I>, worker: F) -> GateResults<T, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: From<WorkerFailure> + Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.spawn_all(items, None, worker).await
    }

    async fn spawn_all<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        local: Option<Arc<Semaphore>>,
        worker: F,
    ) -> GateResults<T, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: From<WorkerFailure> + Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        let mut join_set: JoinSet<(usize, Result<T, E>)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let shared = Arc::clone(&self.semaphore);
            let local = local.clone();
            let task = worker(item);

            join_set.spawn(async move {
                let _local_permit = match local {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            return (index, Err(WorkerFailure("gate closed".into()).into()));
                        }
                    },
                    None => None,
                };
                let _permit = match shared.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(WorkerFailure("gate closed".into()).into())),
                };

                match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(result) => (index, result),
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        (
                            index,
                            Err(WorkerFailure(format!("worker panicked: {}", message)).into()),
                        )
                    }
                }
            });
        }

        let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();
        let mut first_error = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if result.is_err() && first_error.is_none() {
                        first_error = Some(index);
                    }
                    slots[index] = Some(result);
                }
                Err(join_error) => {
                    tracing::error!("gated worker torn down: {}", join_error);
                }
            }
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    if first_error.is_none() {
                        first_error = Some(index);
                    }
                    Err(WorkerFailure("worker did not report a result".into()).into())
                })
            })
            .collect();

        GateResults {
            results,
            first_error,
        }
    }
}
