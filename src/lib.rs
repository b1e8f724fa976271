//! # View Harvester Library
//!
//! Harvests very large, time-ordered datasets from a range-queryable document
//! store view (CouchDB-style `_view` endpoints) without loading the result set
//! into memory and without letting one slow or failing request stall the rest.
//!
//! ## Features
//!
//! - **Sharding**: The requested time range is cut into disjoint shards
//!   (calendar days, hours, minutes or multiples of them)
//! - **Bounded Concurrency**: A fixed pool of workers walks at most `C` shards
//!   at a time
//! - **Cursor Pagination**: Each shard is paged with `startkey_docid` + `skip=1`
//!   so boundary records are never delivered twice
//! - **Isolated Retries**: Transient failures are retried per page with a fixed
//!   or exponential delay; a failing shard never aborts its siblings
//! - **Streaming Output**: Every page is handed to the caller's processor as
//!   soon as it arrives
//! - **Partial Re-harvest**: A shard ledger records per-shard outcomes so a
//!   later run only fetches what is missing
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use view_harvester::fetcher::couch_view::{CouchViewConfig, CouchViewFetcher};
//! use view_harvester::harvest::{HarvestConfig, Harvester};
//! use view_harvester::{Granularity, KeyRange, Record};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let range = KeyRange::new(1514764800000, 1517443200000)?; // January 2018
//! let config = HarvestConfig::new(range, Granularity::days(1));
//!
//! let fetcher = CouchViewFetcher::new(CouchViewConfig::new(
//!     "http://localhost:5984",
//!     "events",
//!     "by_time",
//!     "timestamp",
//! ))?;
//!
//! let processor = |records: &[Record]| {
//!     for record in records {
//!         println!("{} {}", record.key, record.id);
//!     }
//! };
//!
//! let summary = Harvester::new(config, Arc::new(fetcher), Arc::new(processor))?
//!     .run()
//!     .await;
//! println!("{} shards succeeded", summary.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`partition`] - Range partitioning into shards
//! - [`fetcher`] - Page fetcher trait and the CouchDB view client
//! - [`harvest`] - Retry governor, shard walker, scheduler and aggregator
//! - [`output`] - CSV and JSON Lines record writers
//! - [`resume`] - Shard ledger for partial re-harvests
//! - [`shutdown`] - Cooperative cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Page fetchers
pub mod fetcher;

/// Harvest orchestration
pub mod harvest;

/// Harvest observability metrics
pub mod metrics;

/// Record output writers
pub mod output;

/// Range partitioning
pub mod partition;

/// Shard ledger for resuming partial harvests
pub mod resume;

/// Cooperative cancellation shared across workers
pub mod shutdown;

pub use partition::{partition, PartitionError};

/// Milliseconds in one second
pub const SECOND_MS: i64 = 1_000;
/// Milliseconds in one minute
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
/// Milliseconds in one hour
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
/// Milliseconds in one calendar day (UTC)
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// End-exclusive range `[start, end)` over the ordering key, in Unix milliseconds (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    start: i64,
    end: i64,
}

impl KeyRange {
    /// Create a range, rejecting empty or inverted bounds
    pub fn new(start: i64, end: i64) -> Result<Self, PartitionError> {
        if start >= end {
            return Err(PartitionError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive lower bound
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Span of the range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `timestamp` falls inside `[start, end)`
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// Calendar precision of the view's ordering keys
///
/// Keys are ISO-8601 prefixes such as `2018-01-05` or `2018-01-05T13`.
/// A shard's bounds are rendered at this precision and the upper bound gets
/// the key-space maximum suffix so every sub-key of the prefix is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPrecision {
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDTHH`
    Hour,
    /// `YYYY-MM-DDTHH:MM`
    Minute,
    /// `YYYY-MM-DDTHH:MM:SS`
    Second,
}

impl KeyPrecision {
    /// Width of one key unit in milliseconds
    pub fn unit_ms(&self) -> i64 {
        match self {
            KeyPrecision::Day => DAY_MS,
            KeyPrecision::Hour => HOUR_MS,
            KeyPrecision::Minute => MINUTE_MS,
            KeyPrecision::Second => SECOND_MS,
        }
    }

    /// Coarsest precision whose unit divides every one of `values`
    ///
    /// `None` when some value is not a whole number of seconds, since such a
    /// boundary falls inside a key prefix at every precision.
    pub fn aligned_to(values: &[i64]) -> Option<KeyPrecision> {
        [
            KeyPrecision::Day,
            KeyPrecision::Hour,
            KeyPrecision::Minute,
            KeyPrecision::Second,
        ]
        .into_iter()
        .find(|precision| {
            values
                .iter()
                .all(|value| value.rem_euclid(precision.unit_ms()) == 0)
        })
    }

    fn pattern(&self) -> &'static str {
        match self {
            KeyPrecision::Day => "%Y-%m-%d",
            KeyPrecision::Hour => "%Y-%m-%dT%H",
            KeyPrecision::Minute => "%Y-%m-%dT%H:%M",
            KeyPrecision::Second => "%Y-%m-%dT%H:%M:%S",
        }
    }

    /// Render a timestamp as a key prefix at this precision
    pub fn format(&self, timestamp_ms: i64) -> String {
        DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            .format(self.pattern())
            .to_string()
    }
}

impl FromStr for KeyPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(KeyPrecision::Day),
            "hour" => Ok(KeyPrecision::Hour),
            "minute" => Ok(KeyPrecision::Minute),
            "second" => Ok(KeyPrecision::Second),
            _ => Err(format!(
                "Invalid key precision: {s}. Valid options: day, hour, minute, second"
            )),
        }
    }
}

/// Shard width used by the range partitioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Granularity {
    millis: i64,
}

impl Granularity {
    /// Granularity of an arbitrary number of milliseconds (may be invalid)
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// `n` calendar days
    pub const fn days(n: i64) -> Self {
        Self::from_millis(n * DAY_MS)
    }

    /// `n` hours
    pub const fn hours(n: i64) -> Self {
        Self::from_millis(n * HOUR_MS)
    }

    /// `n` minutes
    pub const fn minutes(n: i64) -> Self {
        Self::from_millis(n * MINUTE_MS)
    }

    /// Width in milliseconds
    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Whether the granularity can cut a range (strictly positive)
    pub fn is_valid(&self) -> bool {
        self.millis > 0
    }

    /// Coarsest key precision whose unit divides this granularity
    ///
    /// Shard boundaries also depend on the range, see
    /// [`crate::partition::key_precision`].
    pub fn key_precision(&self) -> Option<KeyPrecision> {
        KeyPrecision::aligned_to(&[self.millis])
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.millis;
        if ms > 0 && ms % DAY_MS == 0 {
            write!(f, "{}d", ms / DAY_MS)
        } else if ms > 0 && ms % HOUR_MS == 0 {
            write!(f, "{}h", ms / HOUR_MS)
        } else if ms > 0 && ms % MINUTE_MS == 0 {
            write!(f, "{}m", ms / MINUTE_MS)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl FromStr for Granularity {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PartitionError::InvalidGranularity(s.to_string());

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '-')
            .ok_or_else(invalid)?;
        let (count, unit) = s.split_at(split);
        let count: i64 = count.parse().map_err(|_| invalid())?;

        let granularity = match unit {
            "m" => Granularity::minutes(count),
            "h" => Granularity::hours(count),
            "d" => Granularity::days(count),
            _ => return Err(invalid()),
        };

        if !granularity.is_valid() {
            return Err(invalid());
        }
        Ok(granularity)
    }
}

/// One view row returned by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Document identifier, stable across requests
    pub id: String,
    /// Ordering key (ISO-8601 timestamp prefix)
    pub key: String,
    /// Emitted view value
    #[serde(default)]
    pub value: serde_json::Value,
    /// Embedded document when requested with `include_docs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<serde_json::Value>,
}

impl Record {
    /// Cursor positioned on this record
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.key.clone(), self.id.clone())
    }
}

/// Pagination cursor: the `(key, id)` of the last delivered record
///
/// Ordered by key, then by document id, which is how the view collates rows
/// that share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Key of the boundary record
    pub key: String,
    /// Document id of the boundary record
    pub id: String,
}

impl Cursor {
    /// Create a cursor
    pub fn new(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
        }
    }

    /// Whether `record` sorts strictly after this cursor
    pub fn precedes(&self, record: &Record) -> bool {
        (self.key.as_str(), self.id.as_str()) < (record.key.as_str(), record.id.as_str())
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.key.as_str(), self.id.as_str()).cmp(&(other.key.as_str(), other.id.as_str()))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.id)
    }
}

/// Stable shard identifier: the shard's start boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(i64);

impl ShardId {
    /// Identifier for a shard starting at `start_ms`
    pub fn new(start_ms: i64) -> Self {
        Self(start_ms)
    }

    /// Start boundary in Unix milliseconds
    pub fn start_ms(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(self.0))
    }
}

/// Render a Unix millisecond timestamp as RFC 3339 (UTC, second precision)
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| millis.to_string())
}
