//! Page fetcher abstraction
//!
//! A [`PageFetcher`] performs exactly one bounded range request against the
//! remote view and returns a [`Page`]. Pagination, retries and concurrency all
//! live above this trait, so implementations stay single-request and
//! stateless.

use crate::{Cursor, KeyPrecision, KeyRange, Record, ShardId};
use async_trait::async_trait;

pub mod classify;
pub mod couch_view;
pub mod shared_resources;

/// Key-space maximum suffix appended to the upper key bound
///
/// Collates after every printable sub-key, so `"2018-01-05" + SENTINEL`
/// includes `"2018-01-05T23:59:59.999Z"` and anything else with that prefix.
pub const KEY_SENTINEL: char = '\u{fff0}';

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Retry-eligible failure: network error, timeout, throttling, 5xx
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Never retried: malformed response, rejected request, protocol violation
    #[error("fatal fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Whether the retry governor may re-issue the request
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Error message without the classification prefix
    pub fn message(&self) -> &str {
        match self {
            FetchError::Transient(msg) | FetchError::Fatal(msg) => msg,
        }
    }
}

/// Result type for fetcher operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Inclusive key bounds for one view query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    /// Lower bound (`startkey`)
    pub start_key: String,
    /// Upper bound (`endkey`), a prefix followed by [`KEY_SENTINEL`]
    pub end_key: String,
}

impl KeyBounds {
    /// Key bounds covering `range` at the given key precision
    ///
    /// The upper prefix is taken from the last millisecond inside the range,
    /// so an end-exclusive, precision-aligned boundary never leaks into the
    /// next shard.
    pub fn for_range(range: KeyRange, precision: KeyPrecision) -> Self {
        let mut end_key = precision.format(range.end() - 1);
        end_key.push(KEY_SENTINEL);
        Self {
            start_key: precision.format(range.start()),
            end_key,
        }
    }

    /// Whether `key` lies within these bounds (byte-wise collation)
    pub fn contains(&self, key: &str) -> bool {
        self.start_key.as_str() <= key && key <= self.end_key.as_str()
    }
}

/// One page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Shard that owns the request
    pub shard: ShardId,
    /// Shard range
    pub range: KeyRange,
    /// Resume strictly after this record; `None` starts at the shard beginning
    pub cursor: Option<Cursor>,
    /// Maximum records to return
    pub limit: usize,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records in view order
    pub records: Vec<Record>,
    /// Continuation cursor; `None` means the shard is exhausted
    pub next: Option<Cursor>,
}

impl Page {
    /// Build a page whose continuation is its last record
    ///
    /// An empty page carries no continuation, which terminates the shard.
    pub fn from_records(records: Vec<Record>) -> Self {
        let next = records.last().map(Record::cursor);
        Self { records, next }
    }

    /// Empty terminal page
    pub fn exhausted() -> Self {
        Self::default()
    }

    /// Whether this page ends the shard
    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}

/// Fetches single pages from the remote service
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Issue exactly one range request
    ///
    /// With a cursor the boundary record itself must be excluded from the
    /// returned page.
    async fn fetch_page(&self, request: &PageRequest) -> FetchResult<Page>;

    /// Short description for logs (e.g. the view URL)
    fn describe(&self) -> String;
}
