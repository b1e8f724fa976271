//! Shard state and lifecycle tracking

use crate::{Cursor, KeyRange, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A disjoint sub-range of the harvest plus its pagination state
///
/// Owned by exactly one worker while it is being walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    id: ShardId,
    range: KeyRange,
    cursor: Option<Cursor>,
    retries: u32,
    pages: u64,
    records: u64,
}

impl Shard {
    /// Fresh shard positioned at the start of `range`
    pub fn new(range: KeyRange) -> Self {
        Self {
            id: ShardId::new(range.start()),
            range,
            cursor: None,
            retries: 0,
            pages: 0,
            records: 0,
        }
    }

    /// Resume the shard strictly after `cursor`
    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Stable identifier (start boundary)
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Sub-range covered by this shard
    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Last delivered record, `None` before the first page
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Retries spent on this shard so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Pages delivered
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Records delivered
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Record a delivered page and move the cursor forward
    ///
    /// Pages that delivered nothing are not counted.
    pub(crate) fn advance(&mut self, next: Option<Cursor>, delivered: usize) {
        if delivered > 0 {
            self.pages += 1;
            self.records += delivered as u64;
        }
        if next.is_some() {
            self.cursor = next;
        }
    }
}

/// Lifecycle of a queued shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Waiting for a worker
    Queued,
    /// Admitted and fetching
    Running,
    /// Waiting out a retry delay
    Retrying,
    /// Walk finished; see the outcome
    Done,
}

/// Unit of scheduler work: a shard and where it is in its lifecycle
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// The shard
    pub shard: Shard,
    /// Lifecycle state
    pub state: WorkState,
}

impl WorkItem {
    /// Queue a shard
    pub fn new(shard: Shard) -> Self {
        Self {
            shard,
            state: WorkState::Queued,
        }
    }

    /// Mark the item admitted
    pub fn start(&mut self) {
        self.state = WorkState::Running;
    }

    /// Count a retry and park the item until the delay elapses
    pub fn begin_retry(&mut self) -> u32 {
        self.shard.retries += 1;
        self.state = WorkState::Retrying;
        self.shard.retries
    }

    /// Back to fetching after a retry delay
    pub fn resume(&mut self) {
        self.state = WorkState::Running;
    }

    /// Mark the item finished
    pub fn finish(&mut self) {
        self.state = WorkState::Done;
    }
}

/// Terminal status of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    /// Every page delivered
    Succeeded,
    /// Retry budget exhausted or fatal error
    Failed,
    /// Interrupted mid-walk
    Cancelled,
    /// Never admitted
    NotStarted,
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ShardStatus::Succeeded => "succeeded",
            ShardStatus::Failed => "failed",
            ShardStatus::Cancelled => "cancelled",
            ShardStatus::NotStarted => "not_started",
        };
        f.write_str(label)
    }
}

/// How a shard's walk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardOutcome {
    /// Exhausted normally
    Succeeded,
    /// Failed with the last observed error
    Failed {
        /// Final error message
        error: String,
    },
    /// Interrupted by cancellation; the shard cursor is where to resume
    Cancelled,
    /// Never admitted
    NotStarted,
}

impl ShardOutcome {
    /// Status without details
    pub fn status(&self) -> ShardStatus {
        match self {
            ShardOutcome::Succeeded => ShardStatus::Succeeded,
            ShardOutcome::Failed { .. } => ShardStatus::Failed,
            ShardOutcome::Cancelled => ShardStatus::Cancelled,
            ShardOutcome::NotStarted => ShardStatus::NotStarted,
        }
    }
}

/// Final per-shard record kept by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReport {
    /// Shard identifier
    pub id: ShardId,
    /// Shard range
    pub range: KeyRange,
    /// Terminal status
    pub status: ShardStatus,
    /// Last error for failed shards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last delivered record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    /// Pages delivered
    pub pages: u64,
    /// Records delivered
    pub records: u64,
    /// Retries spent
    pub retries: u32,
}

impl ShardReport {
    /// Combine a walked shard with its outcome
    pub fn new(shard: &Shard, outcome: &ShardOutcome) -> Self {
        Self {
            id: shard.id(),
            range: shard.range(),
            status: outcome.status(),
            error: match outcome {
                ShardOutcome::Failed { error } => Some(error.clone()),
                _ => None,
            },
            cursor: shard.cursor().cloned(),
            pages: shard.pages(),
            records: shard.records(),
            retries: shard.retries(),
        }
    }
}
