//! Worker capability traits and error taxonomy.
//!
//! A [`Worker`] is one exclusive execution lane: a physical device, a VM,
//! or any other unit that can run a single test at a time. The dispatch
//! engine never branches on a concrete worker type; everything it needs is
//! expressed through these two traits:
//!
//! - [`WorkerFactory`] builds a worker bound to a target and shard index
//! - [`Worker`] covers the set-up/teardown lifecycle, a liveness check,
//!   and the opaque single-test execution call
//!
//! # Implementing a worker
//!
//! ```no_run
//! use async_trait::async_trait;
//! use fanout::dispatch::{RetryToken, TestItem};
//! use fanout::report::{ResultRecord, RunRecords, RunStatus};
//! use fanout::worker::{Worker, WorkerError, WorkerFactory, WorkerResult};
//!
//! struct DeviceWorker {
//!     serial: String,
//!     shard_index: usize,
//! }
//!
//! #[async_trait]
//! impl Worker for DeviceWorker {
//!     fn id(&self) -> &str {
//!         &self.serial
//!     }
//!
//!     async fn set_up(&self) -> WorkerResult<()> {
//!         // install the thing under test, push data files, ...
//!         Ok(())
//!     }
//!
//!     async fn tear_down(&self) -> WorkerResult<()> {
//!         Ok(())
//!     }
//!
//!     async fn is_reachable(&self) -> bool {
//!         true
//!     }
//!
//!     async fn run_test(
//!         &self,
//!         item: &TestItem,
//!     ) -> WorkerResult<(RunRecords, Option<RetryToken>)> {
//!         let record = ResultRecord::new(item.test(), RunStatus::Pass);
//!         Ok((RunRecords::single(record), None))
//!     }
//! }
//!
//! struct DeviceFactory;
//!
//! #[async_trait]
//! impl WorkerFactory for DeviceFactory {
//!     type Worker = DeviceWorker;
//!
//!     async fn create_worker(&self, target: &str, shard_index: usize)
//!         -> WorkerResult<DeviceWorker>
//!     {
//!         Ok(DeviceWorker { serial: target.to_string(), shard_index })
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::dispatch::{RetryToken, TestItem};
use crate::report::RunRecords;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by workers and worker factories.
///
/// The variants carry the dispatch engine's control-flow decisions:
///
/// - [`Unreachable`](WorkerError::Unreachable) is fatal to the worker loop
///   that observes it; the in-flight item is requeued for another worker
///   and the coordinator downgrades the run to a warning exit.
/// - [`Timeout`](WorkerError::Timeout) and every other run-time variant
///   are converted into a crash-type result record; the loop continues.
/// - Set-up failures exclude the worker from the pool; teardown failures
///   are logged and never propagate.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker stopped responding. Fatal to its loop, not the run.
    #[error("worker {0} is unreachable")]
    Unreachable(String),

    /// Single-test execution exceeded its internal timeout.
    #[error("test execution timed out: {0}")]
    Timeout(String),

    /// The worker's set-up procedure failed.
    #[error("failed to set up worker: {0}")]
    SetupFailed(String),

    /// The worker's teardown procedure failed.
    #[error("failed to tear down worker: {0}")]
    TeardownFailed(String),

    /// Any other worker-specific failure.
    #[error("worker error: {0}")]
    Other(#[from] anyhow::Error),
}

/// One exclusive test execution lane.
///
/// A worker is owned by the pool lifecycle manager during creation and
/// teardown, and used by exactly one worker loop during the run phase,
/// never by two loops concurrently.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier for this worker (e.g. a device serial). The last
    /// four characters are used as the result tag in replicated mode.
    fn id(&self) -> &str;

    /// Prepares the worker for test execution.
    async fn set_up(&self) -> WorkerResult<()>;

    /// Releases the worker's resources. Best-effort; errors are logged.
    async fn tear_down(&self) -> WorkerResult<()>;

    /// Liveness check consulted before every test execution.
    async fn is_reachable(&self) -> bool;

    /// Executes one test to completion.
    ///
    /// Returns the records produced by the attempt plus, optionally, a
    /// [`RetryToken`] identifying a dropped sub-portion that should be
    /// resubmitted as a new attempt. The call must return within its own
    /// internal timeout, raising [`WorkerError::Timeout`] rather than
    /// hanging the loop.
    async fn run_test(&self, item: &TestItem) -> WorkerResult<(RunRecords, Option<RetryToken>)>;
}

/// Builds workers bound to targets.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// The concrete worker type this factory produces.
    type Worker: Worker;

    /// Creates a worker for the given target and shard index.
    ///
    /// May raise [`WorkerError::Unreachable`] for an offline target; the
    /// pool excludes that target and continues with the rest.
    async fn create_worker(&self, target: &str, shard_index: usize)
    -> WorkerResult<Self::Worker>;
}
