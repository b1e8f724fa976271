//! Harvest lifecycle events and reporters
//!
//! The scheduler, walker and retry governor describe what they do through
//! [`HarvestEvent`]s. A [`HarvestReporter`] decides what to do with them:
//! the CLI logs them through `tracing`, tests record them, library callers can
//! ignore them.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::aggregator::HarvestSummary;
use super::shard::ShardReport;
use crate::fetcher::FetchError;
use crate::ShardId;

/// Something that happened during a harvest
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// Partitioning done, workers about to start
    Started {
        /// Total shards in the plan
        shards: usize,
        /// Shards skipped because an earlier run finished them
        skipped: usize,
        /// Worker pool size
        workers: usize,
    },
    /// A shard acquired an admission permit
    ShardAdmitted {
        /// Shard identifier
        shard: ShardId,
        /// Shards fetching right now, this one included
        active: usize,
    },
    /// A page was accepted by the aggregator
    PageDelivered {
        /// Shard identifier
        shard: ShardId,
        /// Zero-based page index within the shard
        page: u64,
        /// Records on the page
        records: usize,
    },
    /// A transient failure will be retried after `delay`
    Retry {
        /// Shard identifier
        shard: ShardId,
        /// Retry number for the current request (1-based)
        retry: u32,
        /// Delay before the next attempt
        delay: Duration,
        /// Failure that triggered the retry
        error: &'a FetchError,
    },
    /// A shard reached a terminal state
    ShardFinished {
        /// Final shard report
        report: &'a ShardReport,
    },
    /// The harvest is over
    Completed {
        /// Completion summary
        summary: &'a HarvestSummary,
    },
}

/// Receives harvest events
///
/// Implementations must be cheap; events are reported inline on the worker
/// tasks.
pub trait HarvestReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl HarvestReporter for SilentReporter {}

/// Reporter that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl HarvestReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started {
                shards,
                skipped,
                workers,
            } => {
                info!(shards, skipped, workers, "Harvest started");
            }
            HarvestEvent::ShardAdmitted { shard, active } => {
                debug!(%shard, active, "Shard admitted");
            }
            HarvestEvent::PageDelivered {
                shard,
                page,
                records,
            } => {
                debug!(%shard, page, records, "Page delivered");
            }
            HarvestEvent::Retry {
                shard,
                retry,
                delay,
                error,
            } => {
                warn!(
                    %shard,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying page request"
                );
            }
            HarvestEvent::ShardFinished { report } => match &report.error {
                Some(error) => warn!(
                    shard = %report.id,
                    status = %report.status,
                    records = report.records,
                    retries = report.retries,
                    error,
                    "Shard failed"
                ),
                None => info!(
                    shard = %report.id,
                    status = %report.status,
                    pages = report.pages,
                    records = report.records,
                    retries = report.retries,
                    "Shard finished"
                ),
            },
            HarvestEvent::Completed { summary } => {
                info!(
                    status = %summary.status,
                    succeeded = summary.succeeded,
                    failed = summary.failed.len(),
                    cancelled = summary.cancelled,
                    not_started = summary.not_started,
                    records = summary.records,
                    "Harvest completed"
                );
            }
        }
    }
}
