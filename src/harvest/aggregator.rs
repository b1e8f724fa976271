//! Record sink and completion bookkeeping
//!
//! Workers hand every page to the [`Aggregator`] as soon as it arrives. The
//! caller's [`RecordProcessor`] runs on the page immediately; nothing is
//! buffered beyond the page itself. The aggregator also keeps exactly one
//! [`ShardReport`] per shard and turns them into the final
//! [`HarvestSummary`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::shard::{ShardReport, ShardStatus};
use crate::metrics;
use crate::{Record, ShardId};

/// Errors raised by a record processor
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Writing output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An output writer failed
    #[error("output error: {0}")]
    Output(#[from] crate::output::OutputError),

    /// The processor refused the page
    #[error("{0}")]
    Rejected(String),
}

/// Consumes records page by page
///
/// Called concurrently from several workers, but never concurrently for the
/// same shard.
pub trait RecordProcessor: Send + Sync {
    /// Process one page of records
    fn process(&self, records: &[Record]) -> Result<(), ProcessError>;

    /// Flush buffered output; called once when the harvest ends
    fn flush(&self) -> Result<(), ProcessError> {
        Ok(())
    }
}

impl<F> RecordProcessor for F
where
    F: Fn(&[Record]) + Send + Sync,
{
    fn process(&self, records: &[Record]) -> Result<(), ProcessError> {
        self(records);
        Ok(())
    }
}

/// Aggregator bookkeeping errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// Processor failed on a page
    #[error("record processing failed: {0}")]
    Process(#[from] ProcessError),

    /// Page indices for a shard were not contiguous
    #[error("shard {shard}: page {got} delivered out of order (expected {expected})")]
    OutOfOrder {
        /// Shard identifier
        shard: ShardId,
        /// Next page index the aggregator expected
        expected: u64,
        /// Page index received
        got: u64,
    },

    /// A second outcome arrived for a shard
    #[error("shard {0} already has an outcome")]
    DuplicateOutcome(ShardId),
}

/// Overall harvest status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    /// Every shard succeeded
    Completed,
    /// At least one shard failed; the rest ran to completion
    PartiallyFailed,
    /// Cancellation cut the harvest short
    Cancelled,
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HarvestStatus::Completed => "completed",
            HarvestStatus::PartiallyFailed => "partially_failed",
            HarvestStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A shard that ended in failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedShard {
    /// Shard identifier
    pub id: ShardId,
    /// Final error
    pub error: String,
}

/// Completion summary, produced exactly once per harvest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSummary {
    /// Overall status
    pub status: HarvestStatus,
    /// Shards that succeeded
    pub succeeded: usize,
    /// Failed shards with their final error, ordered by shard
    pub failed: Vec<FailedShard>,
    /// Shards interrupted mid-walk
    pub cancelled: usize,
    /// Shards never admitted
    pub not_started: usize,
    /// Shards skipped because an earlier run already harvested them
    #[serde(default)]
    pub skipped: usize,
    /// Pages delivered
    pub pages: u64,
    /// Records delivered
    pub records: u64,
    /// Retries across all shards
    pub retries: u64,
    /// Per-shard reports, ordered by shard
    pub outcomes: Vec<ShardReport>,
}

impl HarvestSummary {
    /// Whether every shard succeeded
    pub fn is_success(&self) -> bool {
        self.status == HarvestStatus::Completed
    }

    /// Report for one shard
    pub fn outcome(&self, shard: ShardId) -> Option<&ShardReport> {
        self.outcomes.iter().find(|report| report.id == shard)
    }
}

#[derive(Default)]
struct Bookkeeping {
    next_page: HashMap<ShardId, u64>,
    reports: BTreeMap<ShardId, ShardReport>,
}

/// Applies the record processor and collects shard outcomes
pub struct Aggregator {
    processor: Arc<dyn RecordProcessor>,
    books: Mutex<Bookkeeping>,
    pages: AtomicU64,
    records: AtomicU64,
}

impl Aggregator {
    /// Create an aggregator around a processor
    pub fn new(processor: Arc<dyn RecordProcessor>) -> Self {
        Self {
            processor,
            books: Mutex::new(Bookkeeping::default()),
            pages: AtomicU64::new(0),
            records: AtomicU64::new(0),
        }
    }

    /// Process one page for `shard`
    ///
    /// `page_index` must be exactly one past the previous page delivered for
    /// the same shard (zero for the first page).
    pub fn deliver(
        &self,
        shard: ShardId,
        page_index: u64,
        records: &[Record],
    ) -> Result<(), AggregatorError> {
        {
            let mut books = self.lock();
            let expected = books.next_page.entry(shard).or_insert(0);
            if *expected != page_index {
                return Err(AggregatorError::OutOfOrder {
                    shard,
                    expected: *expected,
                    got: page_index,
                });
            }
            *expected += 1;
        }

        self.processor.process(records)?;

        self.pages.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records.len() as u64, Ordering::Relaxed);
        metrics::record_records(records.len());
        Ok(())
    }

    /// Store the terminal report for a shard
    pub fn record_outcome(&self, report: ShardReport) -> Result<(), AggregatorError> {
        let mut books = self.lock();
        if books.reports.contains_key(&report.id) {
            return Err(AggregatorError::DuplicateOutcome(report.id));
        }
        metrics::record_shard(report.status);
        books.reports.insert(report.id, report);
        Ok(())
    }

    /// Whether `shard` already has a terminal report
    pub fn has_outcome(&self, shard: ShardId) -> bool {
        self.lock().reports.contains_key(&shard)
    }

    /// Shards with a recorded outcome
    pub fn finished(&self) -> usize {
        self.lock().reports.len()
    }

    /// Records delivered so far
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Flush the processor
    pub fn flush(&self) -> Result<(), ProcessError> {
        self.processor.flush()
    }

    /// Build the completion summary
    ///
    /// Consumes the aggregator, so a harvest can only ever complete once.
    pub fn finish(self, cancelled: bool) -> HarvestSummary {
        let books = self
            .books
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        summarize(
            books,
            self.pages.into_inner(),
            self.records.into_inner(),
            cancelled,
        )
    }

    /// Summary for an aggregator that could not be unwrapped
    ///
    /// Drains the bookkeeping, so the result is still produced only once.
    pub(crate) fn finish_shared(&self, cancelled: bool) -> HarvestSummary {
        let books = std::mem::take(&mut *self.lock());
        summarize(
            books,
            self.pages.load(Ordering::Relaxed),
            self.records.load(Ordering::Relaxed),
            cancelled,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bookkeeping> {
        // A panicking processor must not hide the other shards' outcomes
        self.books.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn summarize(books: Bookkeeping, pages: u64, records: u64, cancelled: bool) -> HarvestSummary {
    let outcomes: Vec<ShardReport> = books.reports.into_values().collect();

    let count = |status: ShardStatus| outcomes.iter().filter(|r| r.status == status).count();
    let failed: Vec<FailedShard> = outcomes
        .iter()
        .filter(|r| r.status == ShardStatus::Failed)
        .map(|r| FailedShard {
            id: r.id,
            error: r.error.clone().unwrap_or_default(),
        })
        .collect();

    let status = if cancelled {
        HarvestStatus::Cancelled
    } else if !failed.is_empty() {
        HarvestStatus::PartiallyFailed
    } else {
        HarvestStatus::Completed
    };

    HarvestSummary {
        status,
        succeeded: count(ShardStatus::Succeeded),
        cancelled: count(ShardStatus::Cancelled),
        not_started: count(ShardStatus::NotStarted),
        skipped: 0,
        failed,
        pages,
        records,
        retries: outcomes.iter().map(|r| u64::from(r.retries)).sum(),
        outcomes,
    }
}
