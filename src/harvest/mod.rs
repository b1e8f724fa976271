//! Harvest orchestration
//!
//! This module turns a partitioned range into a bounded-concurrency harvest:
//!
//! 1. **Configuration**: [`config::HarvestConfig`] fixes range, granularity,
//!    page size, concurrency ceiling and [`config::RetryPolicy`]
//! 2. **Scheduling**: [`scheduler::Harvester`] queues every shard and runs a
//!    fixed worker pool behind an [`admission::AdmissionGate`]
//! 3. **Walking**: [`walker::ShardWalker`] pages through one shard with its
//!    cursor, wrapping each request in the [`retry::RetryGovernor`]
//! 4. **Sinking**: [`aggregator::Aggregator`] hands each page to the caller's
//!    [`aggregator::RecordProcessor`] and produces the
//!    [`aggregator::HarvestSummary`]
//!
//! # Error Handling
//!
//! Construction errors ([`HarvestError`]) surface synchronously before any
//! request is made. Once running, failures are confined to the shard they
//! occur in and reported in the summary; `run` itself cannot fail.

pub mod admission;
pub mod aggregator;
pub mod config;
pub mod events;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod shard;
pub mod walker;

pub use admission::{AdmissionError, AdmissionGate, AdmissionPermit};
pub use aggregator::{
    Aggregator, AggregatorError, FailedShard, HarvestStatus, HarvestSummary, ProcessError,
    RecordProcessor,
};
pub use config::{Backoff, HarvestConfig, RetryPolicy};
pub use events::{HarvestEvent, HarvestReporter, SilentReporter, TracingReporter};
pub use retry::{RetryError, RetryGovernor};
pub use scheduler::Harvester;
pub use shard::{Shard, ShardOutcome, ShardReport, ShardStatus, WorkItem, WorkState};
pub use walker::ShardWalker;

use crate::PartitionError;

/// Errors that stop a harvest before it starts
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Invalid range or granularity
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
