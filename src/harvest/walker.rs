//! Shard cursor walker
//!
//! Drives one shard from its cursor to exhaustion, one page at a time. The
//! next page is only requested after the aggregator accepted the previous
//! one, because its start position is the previous page's last record.

use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use super::aggregator::Aggregator;
use super::events::{HarvestEvent, HarvestReporter};
use super::retry::{RetryError, RetryGovernor};
use super::shard::{ShardOutcome, WorkItem};
use crate::fetcher::{Page, PageFetcher, PageRequest};
use crate::metrics::PageRequestMetrics;
use crate::shutdown::SharedShutdown;
use crate::Record;

/// Walks shards page by page
#[derive(Clone)]
pub struct ShardWalker {
    fetcher: Arc<dyn PageFetcher>,
    governor: RetryGovernor,
    aggregator: Arc<Aggregator>,
    shutdown: SharedShutdown,
    reporter: Arc<dyn HarvestReporter>,
    page_size: usize,
}

impl ShardWalker {
    /// Create a walker
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        governor: RetryGovernor,
        aggregator: Arc<Aggregator>,
        shutdown: SharedShutdown,
        reporter: Arc<dyn HarvestReporter>,
        page_size: usize,
    ) -> Self {
        Self {
            fetcher,
            governor,
            aggregator,
            shutdown,
            reporter,
            page_size,
        }
    }

    /// Walk the item's shard until it is exhausted, fails or is cancelled
    ///
    /// The shard's cursor and counters are updated in place, so after a
    /// cancelled or failed walk the cursor is where a later run resumes.
    pub async fn walk(&self, item: &mut WorkItem) -> ShardOutcome {
        let span = info_span!("shard", shard = %item.shard.id());
        self.walk_pages(item).instrument(span).await
    }

    async fn walk_pages(&self, item: &mut WorkItem) -> ShardOutcome {
        let shard = item.shard.id();
        let mut page_index: u64 = 0;

        loop {
            if self.shutdown.is_shutdown_requested() {
                debug!(cursor = ?item.shard.cursor(), "Cancelled before next page");
                return ShardOutcome::Cancelled;
            }

            let request = PageRequest {
                shard,
                range: item.shard.range(),
                cursor: item.shard.cursor().cloned(),
                limit: self.page_size,
            };
            let request = &request;
            let fetcher = &self.fetcher;

            let page = self
                .governor
                .run(item, move || async move {
                    let timer = PageRequestMetrics::start(shard);
                    let result = fetcher.fetch_page(request).await;
                    match &result {
                        Ok(page) => timer.record_success(page.records.len()),
                        Err(e) => timer.record_failure(e.is_transient()),
                    }
                    result
                })
                .await;

            let Page { records, next } = match page {
                Ok(page) => page,
                Err(RetryError::Cancelled) => return ShardOutcome::Cancelled,
                Err(e) => {
                    return ShardOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            let current = item.shard.cursor().cloned();
            if let (Some(current), Some(next)) = (&current, &next) {
                if next <= current {
                    warn!(%current, %next, "Continuation cursor did not advance");
                    return ShardOutcome::Failed {
                        error: format!(
                            "protocol violation: continuation cursor {next} does not advance past {current}"
                        ),
                    };
                }
            }

            let records = drop_seen(records, current.as_ref());
            if !records.is_empty() {
                if let Err(e) = self.aggregator.deliver(shard, page_index, &records) {
                    return ShardOutcome::Failed {
                        error: e.to_string(),
                    };
                }
                self.reporter.report(HarvestEvent::PageDelivered {
                    shard,
                    page: page_index,
                    records: records.len(),
                });
                page_index += 1;
            }

            let exhausted = next.is_none();
            item.shard.advance(next, records.len());
            if exhausted {
                debug!(
                    pages = item.shard.pages(),
                    records = item.shard.records(),
                    "Shard exhausted"
                );
                return ShardOutcome::Succeeded;
            }
        }
    }
}

/// Drop records at or before the cursor
fn drop_seen(records: Vec<Record>, cursor: Option<&crate::Cursor>) -> Vec<Record> {
    let Some(cursor) = cursor else {
        return records;
    };
    let before = records.len();
    let fresh: Vec<Record> = records.into_iter().filter(|r| cursor.precedes(r)).collect();
    if fresh.len() < before {
        debug!(
            dropped = before - fresh.len(),
            %cursor,
            "Dropped records already delivered"
        );
    }
    fresh
}
