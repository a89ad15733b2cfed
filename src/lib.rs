//! # fanout
//!
//! A flexible parallel test dispatch engine.
//!
//! fanout distributes a list of tests across a pool of workers (devices,
//! containers, remote hosts, whatever implements the [`Worker`] trait)
//! and aggregates the results into a single report with an exit code.
//!
//! ## Key Features
//!
//! - **Two topologies**: shard one queue across all workers, or replicate
//!   the full test set onto each worker with per-worker result tagging
//! - **Bounded retries**: a test whose runner hands back a retry token is
//!   resubmitted to the shared queue until its retry budget runs out
//! - **Fault isolation**: a crashed test becomes a crash record; an
//!   unreachable worker hands its in-flight test back so a sibling can
//!   finish the run
//! - **Progress watchdog**: a run that stops making progress is cut off
//!   and reported as degraded rather than hanging forever
//! - **Lost coverage is loud**: tests that were queued but never ran fail
//!   the whole run with [`DispatchError::TestsDropped`]
//!
//! ## Architecture
//!
//! ```text
//!  tests ──► Dispatcher ──► TestQueue(s) ◄──── worker loops ◄─── Worker pool
//!                │              ▲                   │
//!                │              └── retries ────────┤
//!                ▼                                  ▼
//!            exit code ◄──────── RunReport ◄── RunRecords
//! ```
//!
//! Implement [`Worker`] and [`WorkerFactory`] for your execution
//! environment, then hand a [`Dispatcher`] the test names and target
//! identifiers. See the [`dispatch`] module for the execution flow.

pub mod config;
pub mod dispatch;
pub mod report;
pub mod worker;

pub use config::{Config, DispatchConfig, ExitCodes, Topology, load_config, load_config_str};
pub use dispatch::{
    DispatchError, DispatchResult, Dispatcher, RetryToken, TestItem, TestQueue, Watchdog,
};
pub use report::{ResultRecord, RunRecords, RunReport, RunStatus};
pub use worker::{Worker, WorkerError, WorkerFactory, WorkerResult};
