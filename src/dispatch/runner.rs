//! The per-worker control loop.
//!
//! [`drain_queue`] binds one worker to one queue and pulls items until the
//! queue reports completion. Per-test failures never escape the loop: run
//! errors become crash-type records and the loop moves on. Only an
//! unreachable worker aborts the loop, and even then the in-flight item is
//! requeued first so a sibling worker can pick it up.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dispatch::queue::{TestItem, TestQueue};
use crate::dispatch::watchdog::Watchdog;
use crate::report::{ResultRecord, RunRecords, RunStatus};
use crate::worker::{Worker, WorkerError};

/// What a finished attempt asks the loop to do next.
enum Disposition {
    /// Results recorded; nothing further for this item.
    Recorded,
    /// Passing partial results recorded; requeue this retry item.
    Retry(TestItem),
}

/// Runs tests from `queue` on `worker` until the queue is exhausted.
///
/// Every dequeued item is marked complete exactly once, on every path,
/// including the item requeued when the worker turns unreachable. Results
/// are appended to the shared `out_results` list as each attempt finishes,
/// so partial results survive a loop that later aborts.
///
/// `tag` carries the worker suffix in replicated mode; `None` disables
/// result-name tagging.
pub(crate) async fn drain_queue<W: Worker>(
    worker: Arc<W>,
    queue: Arc<TestQueue>,
    watchdog: Arc<Watchdog>,
    out_results: Arc<Mutex<Vec<RunRecords>>>,
    max_retries: usize,
    tag: Option<String>,
) -> Result<(), WorkerError> {
    while let Some(item) = queue.take().await {
        watchdog.reset();

        let step = run_item(
            worker.as_ref(),
            &item,
            max_retries,
            tag.as_deref(),
            &out_results,
        )
        .await;

        // Retries count as separate queue entries, so the dequeued item is
        // always marked complete here, after any requeue and never before.
        match step {
            Ok(Disposition::Recorded) => queue.mark_complete(),
            Ok(Disposition::Retry(retry_item)) => {
                queue.add(retry_item);
                queue.mark_complete();
            }
            Err(fatal) => {
                queue.add(item);
                queue.mark_complete();
                return Err(fatal);
            }
        }
    }
    Ok(())
}

/// Executes one dequeued item and records its results.
///
/// Returns `Err` only for conditions fatal to this loop; all ordinary
/// failures are converted into records.
async fn run_item<W: Worker>(
    worker: &W,
    item: &TestItem,
    max_retries: usize,
    tag: Option<&str>,
    out_results: &Mutex<Vec<RunRecords>>,
) -> Result<Disposition, WorkerError> {
    if !worker.is_reachable().await {
        warn!("worker {} is unreachable", worker.id());
        return Err(WorkerError::Unreachable(worker.id().to_string()));
    }

    match worker.run_test(item).await {
        Ok((records, retry)) => {
            let records = match tag {
                Some(tag) => records.tagged(tag),
                None => records,
            };
            let tries = item.attempts() + 1;
            if let Some(token) = retry {
                if tries <= max_retries {
                    // Record only the passing partial results now; the
                    // failing portion gets a fresh attempt.
                    out_results.lock().await.push(records.passes());
                    warn!("will retry test {}, try #{tries}", item.test());
                    return Ok(Disposition::Retry(TestItem::retry(token, tries)));
                }
                debug!("retry budget exhausted for {}", item.test());
            }
            out_results.lock().await.push(records);
            Ok(Disposition::Recorded)
        }
        Err(err @ WorkerError::Unreachable(_)) => Err(err),
        Err(err) => {
            // Timeouts and runner faults are ordinary per-test failures:
            // record a crash and keep the loop alive.
            warn!("test {} crashed on worker {}: {err}", item.test(), worker.id());
            let mut records =
                RunRecords::single(ResultRecord::new(item.test(), RunStatus::Crash)
                    .with_output(err.to_string()));
            if let Some(tag) = tag {
                records = records.tagged(tag);
            }
            out_results.lock().await.push(records);
            Ok(Disposition::Recorded)
        }
    }
}

/// Short worker-identifying suffix used to tag results in replicated mode.
///
/// Mirrors the convention of tagging with the last four characters of a
/// device serial.
pub(crate) fn worker_tag(id: &str) -> String {
    let len = id.chars().count();
    id.chars().skip(len.saturating_sub(4)).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::dispatch::RetryToken;
    use crate::worker::WorkerResult;

    /// Scripted worker: per-test behaviors plus an optional reachability
    /// budget (number of runs before the worker drops offline).
    struct ScriptedWorker {
        id: String,
        behaviors: HashMap<String, Behavior>,
        runs: AtomicUsize,
        reachable_for: Option<usize>,
        attempts_seen: StdMutex<Vec<usize>>,
    }

    #[derive(Clone)]
    enum Behavior {
        Pass,
        FailWithRetry,
        PartialPass,
        CrashError,
    }

    impl ScriptedWorker {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                behaviors: HashMap::new(),
                runs: AtomicUsize::new(0),
                reachable_for: None,
                attempts_seen: StdMutex::new(Vec::new()),
            }
        }

        fn with_behavior(mut self, test: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(test.to_string(), behavior);
            self
        }

        fn reachable_for(mut self, runs: usize) -> Self {
            self.reachable_for = Some(runs);
            self
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn id(&self) -> &str {
            &self.id
        }

        async fn set_up(&self) -> WorkerResult<()> {
            Ok(())
        }

        async fn tear_down(&self) -> WorkerResult<()> {
            Ok(())
        }

        async fn is_reachable(&self) -> bool {
            match self.reachable_for {
                Some(budget) => self.runs.load(Ordering::SeqCst) < budget,
                None => true,
            }
        }

        async fn run_test(
            &self,
            item: &TestItem,
        ) -> WorkerResult<(RunRecords, Option<RetryToken>)> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.attempts_seen.lock().unwrap().push(item.attempts());
            match self.behaviors.get(item.test()).unwrap_or(&Behavior::Pass) {
                Behavior::Pass => Ok((
                    RunRecords::single(ResultRecord::new(item.test(), RunStatus::Pass)),
                    None,
                )),
                Behavior::FailWithRetry => Ok((
                    RunRecords::single(ResultRecord::new(item.test(), RunStatus::Fail)),
                    Some(RetryToken::new(item.test())),
                )),
                Behavior::PartialPass => {
                    let mut records = RunRecords::new();
                    records.push(ResultRecord::new(
                        format!("{}.ok", item.test()),
                        RunStatus::Pass,
                    ));
                    records.push(ResultRecord::new(
                        format!("{}.dropped", item.test()),
                        RunStatus::Fail,
                    ));
                    Ok((records, Some(RetryToken::new(item.test()))))
                }
                Behavior::CrashError => {
                    Err(WorkerError::Timeout(format!("{} hung", item.test())))
                }
            }
        }
    }

    async fn drain(
        worker: ScriptedWorker,
        queue: Arc<TestQueue>,
        max_retries: usize,
        tag: Option<String>,
    ) -> (Vec<RunRecords>, Result<(), WorkerError>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let watchdog = Arc::new(Watchdog::new(None));
        let result = drain_queue(
            Arc::new(worker),
            queue,
            watchdog,
            out.clone(),
            max_retries,
            tag,
        )
        .await;
        let collected = out.lock().await.clone();
        (collected, result)
    }

    #[tokio::test]
    async fn test_drains_queue_and_records_passes() {
        let queue = Arc::new(TestQueue::new(vec![
            TestItem::new("a"),
            TestItem::new("b"),
        ]));
        let (collected, result) = drain(ScriptedWorker::new("w1"), queue.clone(), 0, None).await;

        assert!(result.is_ok());
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|r| r.did_pass()));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_retry_records_only_passing_partials() {
        let worker = ScriptedWorker::new("w1").with_behavior("a", Behavior::PartialPass);
        let queue = Arc::new(TestQueue::new(vec![TestItem::new("a")]));
        let (collected, result) = drain(worker, queue.clone(), 1, None).await;

        assert!(result.is_ok());
        // Attempt 1: passing partial only. Attempt 2 (budget exhausted):
        // full records, including the failing portion.
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].len(), 1);
        assert!(collected[0].did_pass());
        assert_eq!(collected[1].len(), 2);
        assert!(!collected[1].did_pass());
    }

    #[tokio::test]
    async fn test_attempt_counter_strictly_increases() {
        let worker = ScriptedWorker::new("w1").with_behavior("a", Behavior::FailWithRetry);
        let queue = Arc::new(TestQueue::new(vec![TestItem::new("a")]));
        let out = Arc::new(Mutex::new(Vec::new()));
        let watchdog = Arc::new(Watchdog::new(None));
        let worker = Arc::new(worker);

        let result = drain_queue(worker.clone(), queue, watchdog, out, 2, None).await;
        assert!(result.is_ok());
        assert_eq!(*worker.attempts_seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_run_errors_become_crash_records() {
        let worker = ScriptedWorker::new("w1").with_behavior("a", Behavior::CrashError);
        let queue = Arc::new(TestQueue::new(vec![
            TestItem::new("a"),
            TestItem::new("b"),
        ]));
        let (collected, result) = drain(worker, queue, 0, None).await;

        // The crash did not abort the loop; "b" still ran.
        assert!(result.is_ok());
        assert_eq!(collected.len(), 2);
        let crash = collected
            .iter()
            .flat_map(|r| r.iter())
            .find(|r| r.name == "a")
            .unwrap();
        assert_eq!(crash.status, RunStatus::Crash);
        assert!(crash.output.as_deref().unwrap().contains("hung"));
    }

    #[tokio::test]
    async fn test_unreachable_requeues_item_and_aborts_loop() {
        let worker = ScriptedWorker::new("w1").reachable_for(1);
        let queue = Arc::new(TestQueue::new(vec![
            TestItem::new("a"),
            TestItem::new("b"),
        ]));
        let (collected, result) = drain(worker, queue.clone(), 0, None).await;

        assert!(matches!(result, Err(WorkerError::Unreachable(_))));
        // One test ran before the worker dropped offline; the in-flight
        // item went back on the queue with its completion accounted for.
        assert_eq!(collected.len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight(), 1);

        // A healthy sibling can finish the run.
        let (rest, result) = drain(ScriptedWorker::new("w2"), queue.clone(), 0, None).await;
        assert!(result.is_ok());
        assert_eq!(rest.len(), 1);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_replicated_tagging_renames_records() {
        let queue = Arc::new(TestQueue::new(vec![TestItem::new("a")]));
        let (collected, _) = drain(
            ScriptedWorker::new("device-0042"),
            queue,
            0,
            Some(worker_tag("device-0042")),
        )
        .await;

        assert_eq!(collected[0].iter().next().unwrap().name, "0042_a");
    }

    #[test]
    fn test_worker_tag_takes_last_four_chars() {
        assert_eq!(worker_tag("emulator-5554"), "5554");
        assert_eq!(worker_tag("ab"), "ab");
    }
}
