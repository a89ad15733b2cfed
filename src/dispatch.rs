//! The dispatch engine: queue topology, worker loops, and the coordinator.
//!
//! # Execution Flow
//!
//! ```text
//!   Dispatcher::run(tests, targets)
//!        │
//!        │  pool::create_all (parallel set-up, partial success ok)
//!        ▼
//!   Vec<Arc<Worker>>
//!        │
//!        │  topology: Sharded ──► one shared TestQueue
//!        │            Replicated ──► one full-copy TestQueue per worker
//!        ▼
//!   one drain_queue loop per (worker, queue), spawned concurrently
//!        │
//!        │  join bounded by the shared Watchdog
//!        ▼
//!   consistency check ──► RunReport + exit code
//!        │
//!        │  pool::tear_down_all (always, best-effort)
//!        ▼
//!   (RunReport, i32)
//! ```
//!
//! The coordinator's phases are strictly linear: workers are created once,
//! queues built once, loops joined once, and teardown runs regardless of
//! how the run phase ended.

pub mod pool;
pub mod queue;
pub mod watchdog;

mod runner;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{DispatchConfig, Topology};
use crate::report::{RunRecords, RunReport};
use crate::worker::{Worker, WorkerFactory};

pub use queue::{RetryToken, TestItem, TestQueue};
pub use watchdog::Watchdog;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors fatal to an entire dispatch run.
///
/// Ordinary failures (failing tests, unreachable workers, an elapsed
/// watchdog) are reported through the exit code, not through this type.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Queued tests were never run: every worker loop finished but items
    /// remain. Implies lost coverage, typically because all targets went
    /// offline.
    #[error("{remaining} queued tests were never run (recorded {recorded} results); all targets are likely offline")]
    TestsDropped {
        /// Items still visible across all queues.
        remaining: usize,
        /// Results recorded before the run stopped.
        recorded: usize,
    },
}

/// Top-level coordinator for one dispatch run.
///
/// Ties together a [`WorkerFactory`], the queue topology, the shared
/// watchdog, and result aggregation. Construct one per run configuration;
/// [`run`](Dispatcher::run) may be called repeatedly, each call building
/// and tearing down its own worker pool.
///
/// # Example
///
/// ```no_run
/// use fanout::config::DispatchConfig;
/// use fanout::dispatch::Dispatcher;
/// # use fanout::worker::{WorkerFactory, WorkerResult};
/// # async fn example<F>(factory: F) -> anyhow::Result<()>
/// # where F: WorkerFactory, F::Worker: 'static {
/// let dispatcher = Dispatcher::new(DispatchConfig::default(), factory);
///
/// let tests = vec!["test_add".to_string(), "test_sub".to_string()];
/// let targets = vec!["device-1".to_string(), "device-2".to_string()];
///
/// let (report, exit_code) = dispatcher.run(&tests, &targets).await?;
/// println!("{} passed, {} failed", report.pass_count(), report.fail_count());
/// std::process::exit(exit_code)
/// # }
/// ```
pub struct Dispatcher<F> {
    config: DispatchConfig,
    factory: F,
}

impl<F> Dispatcher<F>
where
    F: WorkerFactory,
    F::Worker: 'static,
{
    /// Creates a dispatcher with the given configuration and factory.
    pub fn new(config: DispatchConfig, factory: F) -> Self {
        Self { config, factory }
    }

    /// Runs all tests on the given targets and returns the aggregate
    /// report plus an exit code.
    ///
    /// An empty test list short-circuits to an error exit with an empty
    /// report; no workers are created. Workers are always torn down, even
    /// when the run phase fails.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TestsDropped`] when every worker loop
    /// finished but queued tests remain; lost coverage must never be
    /// silent.
    pub async fn run(&self, tests: &[String], targets: &[String]) -> DispatchResult<(RunReport, i32)> {
        if tests.is_empty() {
            error!("no tests to run");
            return Ok((RunReport::new(), self.config.exit_codes.error));
        }

        match self.config.topology {
            Topology::Sharded => info!("will run {} tests sharded across targets", tests.len()),
            Topology::Replicated => info!("will run {} tests replicated on each target", tests.len()),
        }

        let workers = pool::create_all(&self.factory, targets, self.config.setup_timeout()).await;
        let outcome = self.run_all(&workers, tests).await;
        pool::tear_down_all(&workers, self.config.setup_timeout()).await;
        outcome
    }

    /// The run phase: build queues, spawn loops, join under the watchdog,
    /// check consistency, aggregate.
    async fn run_all(
        &self,
        workers: &[Arc<F::Worker>],
        tests: &[String],
    ) -> DispatchResult<(RunReport, i32)> {
        if workers.is_empty() {
            error!("no workers available; {} tests cannot run", tests.len());
            return Err(DispatchError::TestsDropped {
                remaining: tests.len(),
                recorded: 0,
            });
        }
        info!("running tests with {} worker loops", workers.len());

        let items = || tests.iter().map(TestItem::new);
        let mut queues: Vec<Arc<TestQueue>> = Vec::new();
        let mut assignments: Vec<(Arc<F::Worker>, Arc<TestQueue>)> = Vec::new();
        match self.config.topology {
            Topology::Sharded => {
                let shared = Arc::new(TestQueue::new(items()));
                queues.push(shared.clone());
                for worker in workers {
                    assignments.push((worker.clone(), shared.clone()));
                }
            }
            Topology::Replicated => {
                for worker in workers {
                    let own = Arc::new(TestQueue::new(items()));
                    queues.push(own.clone());
                    assignments.push((worker.clone(), own));
                }
            }
        }
        let tag_results = self.config.topology == Topology::Replicated;

        let watchdog = Arc::new(Watchdog::new(self.config.test_timeout()));
        let results: Arc<Mutex<Vec<RunRecords>>> = Arc::new(Mutex::new(Vec::new()));

        let mut loops = JoinSet::new();
        for (worker, queue) in assignments {
            let tag = tag_results.then(|| runner::worker_tag(worker.id()));
            loops.spawn(runner::drain_queue(
                worker,
                queue,
                watchdog.clone(),
                results.clone(),
                self.config.max_retries,
                tag,
            ));
        }

        // Join all loops, bounded by the shared watchdog. Both an elapsed
        // watchdog and a surfaced unreachable-worker condition degrade the
        // run to a warning; whatever was recorded still gets aggregated.
        let mut degraded = false;
        let mut stalled = false;
        loop {
            let joined = match watchdog.remaining() {
                Some(left) => match tokio::time::timeout(left, loops.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        if watchdog.expired() {
                            warn!("watchdog expired with {} loops still running", loops.len());
                            degraded = true;
                            stalled = true;
                            break;
                        }
                        // Progress was recorded while we waited; keep going
                        // against the pushed-out deadline.
                        continue;
                    }
                },
                None => loops.join_next().await,
            };
            match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(err))) => {
                    error!("worker loop aborted: {err}");
                    degraded = true;
                }
                Some(Err(err)) => {
                    error!("worker loop panicked: {err}");
                    degraded = true;
                }
            }
        }
        // Loops still running after a stall are detached, not cancelled: the
        // single-test call each is stuck in has its own internal timeout, and
        // in-flight executions are never forcibly killed.
        loops.detach_all();

        let mut report = RunReport::new();
        for records in results.lock().await.drain(..) {
            report.merge(records);
        }

        // Every queue must be visibly empty once all loops have finished;
        // leftovers mean tests were dropped. A stalled run skips the check:
        // its loops never finished, so the precondition does not hold.
        if !stalled {
            let remaining: usize = queues.iter().map(|queue| queue.len()).sum();
            if remaining > 0 {
                return Err(DispatchError::TestsDropped {
                    remaining,
                    recorded: report.len(),
                });
            }
        }

        let mut exit_code = self.config.exit_codes.success;
        if degraded {
            exit_code = self.config.exit_codes.warning;
        }
        if !report.did_pass() {
            exit_code = self.config.exit_codes.error;
        }
        Ok((report, exit_code))
    }
}
