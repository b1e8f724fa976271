//! Shard ledger persistence
//!
//! The ledger remembers how every shard of a harvest ended. A later run over
//! the same view, range and granularity skips the shards that succeeded and
//! restarts the rest from their last cursor.
//!
//! Writes are atomic (temp file + rename) and coordinated through an
//! advisory `fd-lock` on a sibling `.lock` file.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::harvest::aggregator::HarvestSummary;
use crate::harvest::config::HarvestConfig;
use crate::harvest::shard::{Shard, ShardReport, ShardStatus};
use crate::{Granularity, KeyRange, ShardId};

/// Current ledger schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed ledger size (64 MB); roughly a million shard entries
pub const MAX_LEDGER_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// What the ledger was recorded for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerScope {
    /// Fetcher description, usually the view URL
    pub view: String,
    /// Harvest range
    pub range: KeyRange,
    /// Shard width
    pub granularity: Granularity,
}

/// Per-shard outcomes of previous harvests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardLedger {
    schema_version: String,
    scope: LedgerScope,
    shards: Vec<ShardReport>,
    created_at: i64,
    updated_at: i64,
}

/// Shards still to harvest after applying a ledger
#[derive(Debug, Clone)]
pub struct ResumePlan {
    /// Shards to walk, in partition order
    pub shards: Vec<Shard>,
    /// Shards skipped because they already succeeded
    pub skipped: usize,
    /// Shards resuming from a recorded cursor
    pub resumed: usize,
}

impl ShardLedger {
    /// Empty ledger for a harvest of `view` with `config`
    pub fn new(view: impl Into<String>, config: &HarvestConfig) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            scope: LedgerScope {
                view: view.into(),
                range: config.range,
                granularity: config.granularity,
            },
            shards: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// What the ledger covers
    pub fn scope(&self) -> &LedgerScope {
        &self.scope
    }

    /// Recorded shard entries, ordered by shard
    pub fn entries(&self) -> &[ShardReport] {
        &self.shards
    }

    /// Entry for one shard
    pub fn entry(&self, id: ShardId) -> Option<&ShardReport> {
        self.shards
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|idx| &self.shards[idx])
    }

    /// Entries that have not succeeded yet
    pub fn pending(&self) -> usize {
        self.shards
            .iter()
            .filter(|entry| entry.status != ShardStatus::Succeeded)
            .count()
    }

    /// Check that the ledger belongs to this harvest
    pub fn ensure_scope(&self, view: &str, config: &HarvestConfig) -> Result<(), ResumeError> {
        let expected = LedgerScope {
            view: view.to_string(),
            range: config.range,
            granularity: config.granularity,
        };
        if self.scope != expected {
            return Err(ResumeError::ScopeMismatch(format!(
                "ledger covers {} {} by {}, harvest is {} {} by {}",
                self.scope.view,
                self.scope.range,
                self.scope.granularity,
                expected.view,
                expected.range,
                expected.granularity
            )));
        }
        Ok(())
    }

    /// Fold a harvest summary into the ledger
    ///
    /// Shards that were never started keep whatever an earlier run recorded.
    pub fn record_summary(&mut self, summary: &HarvestSummary) {
        for report in &summary.outcomes {
            match self.shards.binary_search_by_key(&report.id, |entry| entry.id) {
                Ok(idx) => {
                    if report.status != ShardStatus::NotStarted {
                        let mut merged = report.clone();
                        // Counters accumulate across runs
                        merged.pages += self.shards[idx].pages;
                        merged.records += self.shards[idx].records;
                        merged.retries += self.shards[idx].retries;
                        self.shards[idx] = merged;
                    }
                }
                Err(idx) => self.shards.insert(idx, report.clone()),
            }
        }
        self.updated_at = chrono::Utc::now().timestamp_millis();

        debug!(
            entries = self.shards.len(),
            pending = self.pending(),
            "Recorded harvest summary in ledger"
        );
    }

    /// Drop succeeded shards and position the others at their recorded cursor
    pub fn plan(&self, shards: Vec<Shard>) -> ResumePlan {
        let mut plan = ResumePlan {
            shards: Vec::with_capacity(shards.len()),
            skipped: 0,
            resumed: 0,
        };

        for shard in shards {
            match self.entry(shard.id()) {
                Some(entry) if entry.range == shard.range() => match entry.status {
                    ShardStatus::Succeeded => plan.skipped += 1,
                    _ => {
                        if entry.cursor.is_some() {
                            plan.resumed += 1;
                        }
                        plan.shards.push(shard.with_cursor(entry.cursor.clone()));
                    }
                },
                _ => plan.shards.push(shard),
            }
        }

        info!(
            remaining = plan.shards.len(),
            skipped = plan.skipped,
            resumed = plan.resumed,
            "Applied shard ledger"
        );
        plan
    }

    /// Save the ledger with atomic writes and file locking
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(path = %path.display(), entries = self.shards.len(), "Saving shard ledger");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let mut lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        info!(
            path = %path.display(),
            entries = self.shards.len(),
            pending = self.pending(),
            "Shard ledger saved"
        );
        Ok(())
    }

    /// Load a ledger with locking
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading shard ledger");

        let lock = RwLock::new(open_lock_file(path)?);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_LEDGER_FILE_SIZE {
            return Err(ResumeError::LedgerTooLarge {
                size: metadata.len(),
                max: MAX_LEDGER_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let mut ledger: ShardLedger = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize shard ledger");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if ledger.schema_version != SCHEMA_VERSION {
            warn!(
                found_version = %ledger.schema_version,
                expected_version = SCHEMA_VERSION,
                "Shard ledger schema version mismatch"
            );
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: ledger.schema_version,
            });
        }

        // Hand-edited files may be unsorted; lookups rely on order
        ledger.shards.sort_by_key(|entry| entry.id);

        info!(
            entries = ledger.shards.len(),
            pending = ledger.pending(),
            "Shard ledger loaded"
        );
        Ok(ledger)
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, ResumeError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))
}

/// Errors related to the shard ledger
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Ledger belongs to a different harvest
    #[error("ledger does not match this harvest: {0}")]
    ScopeMismatch(String),

    /// Ledger file too large
    #[error("ledger file too large: {size} bytes (max: {max} bytes)")]
    LedgerTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
