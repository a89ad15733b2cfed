//! Parallel worker pool set-up and teardown.
//!
//! Both phases run one concurrent task per target under a shared batch
//! deadline. Partial success is the expected mode: a target that fails or
//! is still pending when the deadline fires is logged and left out of the
//! pool, and the batch carries on with the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use crate::worker::{Worker, WorkerFactory};

/// Hands out shard indices to concurrently created workers.
///
/// Set-up runs in parallel, so the index must come from an atomic source
/// shared across the batch to guarantee no two workers collide.
struct ShardCounter {
    next: AtomicUsize,
}

impl ShardCounter {
    fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    /// Returns the current value and increments it atomically.
    fn get_and_increment(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Creates and sets up one worker per target, in parallel.
///
/// Targets whose creation or set-up fails are excluded from the returned
/// pool. Targets still pending when `timeout` elapses are abandoned; the
/// batch itself never fails.
pub async fn create_all<F: WorkerFactory>(
    factory: &F,
    targets: &[String],
    timeout: Option<Duration>,
) -> Vec<Arc<F::Worker>> {
    info!("creating {} workers", targets.len());

    let counter = ShardCounter::new();
    let mut setups: FuturesUnordered<_> = targets
        .iter()
        .map(|target| set_up_target(factory, target.as_str(), &counter))
        .collect();

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut workers = Vec::new();
    loop {
        let next = match deadline {
            Some(at) => match timeout_at(at, setups.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        "worker set-up deadline elapsed; abandoning {} pending targets",
                        setups.len()
                    );
                    break;
                }
            },
            None => setups.next().await,
        };
        match next {
            Some(Some(worker)) => workers.push(Arc::new(worker)),
            Some(None) => {}
            None => break,
        }
    }
    workers
}

async fn set_up_target<F: WorkerFactory>(
    factory: &F,
    target: &str,
    counter: &ShardCounter,
) -> Option<F::Worker> {
    let index = counter.get_and_increment();
    info!("creating shard {index} for target {target}");

    let worker = match factory.create_worker(target, index).await {
        Ok(worker) => worker,
        Err(err) => {
            warn!("failed to create shard for {target}: {err}");
            return None;
        }
    };
    if let Err(err) = worker.set_up().await {
        warn!("failed to set up worker {}: {err}", worker.id());
        return None;
    }
    Some(worker)
}

/// Tears down every worker in parallel, best-effort.
///
/// Individual failures are logged, never raised; a worker still pending
/// when `timeout` elapses is abandoned. Calling this with an empty slice
/// is a no-op.
pub async fn tear_down_all<W: Worker>(workers: &[Arc<W>], timeout: Option<Duration>) {
    if workers.is_empty() {
        return;
    }

    let mut teardowns: FuturesUnordered<_> = workers
        .iter()
        .map(|worker| async move {
            if let Err(err) = worker.tear_down().await {
                warn!("worker {} unresponsive during teardown: {err}", worker.id());
            }
        })
        .collect();

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let next = match deadline {
            Some(at) => match timeout_at(at, teardowns.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        "teardown deadline elapsed; abandoning {} pending workers",
                        teardowns.len()
                    );
                    return;
                }
            },
            None => teardowns.next().await,
        };
        if next.is_none() {
            break;
        }
    }
}
