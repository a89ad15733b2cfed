//! Result records and the aggregate run report.
//!
//! A single test attempt produces a [`RunRecords`] collection (most tests
//! yield one [`ResultRecord`], but a runner may report sub-results). The
//! coordinator merges everything into a [`RunReport`], an unordered
//! aggregate keyed by (tagged) record name. Formatting and serialization
//! of reports is left to callers.

use std::collections::HashMap;
use std::time::Duration;

/// The terminal status of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Test passed.
    Pass,
    /// Test ran to completion but failed.
    Fail,
    /// Test crashed, timed out, or otherwise never produced a verdict.
    Crash,
    /// The runner could not determine an outcome.
    Unknown,
}

impl RunStatus {
    /// Returns true for [`RunStatus::Pass`].
    pub fn is_pass(&self) -> bool {
        matches!(self, RunStatus::Pass)
    }
}

/// An immutable, named outcome for a single test execution.
///
/// Built with the usual builder methods:
///
/// ```
/// use std::time::Duration;
/// use fanout::report::{ResultRecord, RunStatus};
///
/// let record = ResultRecord::new("test_add", RunStatus::Pass)
///     .with_duration(Duration::from_millis(12));
/// assert!(record.status.is_pass());
/// ```
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// Test name; in replicated mode this carries a worker-identifying tag.
    pub name: String,

    /// Outcome of the execution.
    pub status: RunStatus,

    /// Wall-clock duration of the execution.
    pub duration: Duration,

    /// Optional diagnostic text (captured output, error message).
    pub output: Option<String>,
}

impl ResultRecord {
    /// Creates a record with the given name and status.
    pub fn new(name: impl Into<String>, status: RunStatus) -> Self {
        Self {
            name: name.into(),
            status,
            duration: Duration::ZERO,
            output: None,
        }
    }

    /// Sets the execution duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Attaches diagnostic text.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// The records produced by one test attempt.
#[derive(Debug, Clone, Default)]
pub struct RunRecords {
    records: Vec<ResultRecord>,
}

impl RunRecords {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection holding a single record.
    pub fn single(record: ResultRecord) -> Self {
        Self {
            records: vec![record],
        }
    }

    /// Appends a record.
    pub fn push(&mut self, record: ResultRecord) {
        self.records.push(record);
    }

    /// Returns only the passing records, used when an attempt will be
    /// retried: failing partial results must not reach the aggregate.
    pub fn passes(&self) -> RunRecords {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.status.is_pass())
                .cloned()
                .collect(),
        }
    }

    /// Prefixes every record name with a worker-identifying tag.
    ///
    /// Used in replicated mode so the same test run on two workers yields
    /// two distinct entries in the set-keyed aggregate.
    pub fn tagged(mut self, tag: &str) -> Self {
        for record in &mut self.records {
            record.name = format!("{tag}_{}", record.name);
        }
        self
    }

    /// Iterates over the records.
    pub fn iter(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records were produced.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if every record passed.
    pub fn did_pass(&self) -> bool {
        self.records.iter().all(|r| r.status.is_pass())
    }
}

impl IntoIterator for RunRecords {
    type Item = ResultRecord;
    type IntoIter = std::vec::IntoIter<ResultRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<ResultRecord> for RunRecords {
    fn from_iter<I: IntoIterator<Item = ResultRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// The aggregate report for an entire dispatch run.
///
/// Append-only and keyed by record name; no ordering is guaranteed across
/// records. Keyed insertion gives set semantics: two records with the
/// same (tagged) name collapse to the most recent one.
#[derive(Debug, Default)]
pub struct RunReport {
    records: HashMap<String, ResultRecord>,
}

impl RunReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one record, replacing any previous record with the same name.
    pub fn add_record(&mut self, record: ResultRecord) {
        self.records.insert(record.name.clone(), record);
    }

    /// Merges one attempt's records into the report.
    pub fn merge(&mut self, records: RunRecords) {
        for record in records {
            self.add_record(record);
        }
    }

    /// All records, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.values()
    }

    /// Looks up a record by its (tagged) name.
    pub fn get(&self, name: &str) -> Option<&ResultRecord> {
        self.records.get(name)
    }

    /// Number of records in the report.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the report holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of passing records.
    pub fn pass_count(&self) -> usize {
        self.records.values().filter(|r| r.status.is_pass()).count()
    }

    /// Number of non-passing records (failed, crashed, or unknown).
    pub fn fail_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| !r.status.is_pass())
            .count()
    }

    /// Returns true if every recorded result passed.
    pub fn did_pass(&self) -> bool {
        self.records.values().all(|r| r.status.is_pass())
    }
}
