//! Concurrency scheduler
//!
//! A fixed pool of `min(C, shards)` workers pulls shards from a FIFO queue.
//! Each worker admits its shard through the [`AdmissionGate`], walks it to a
//! terminal outcome, releases the slot and takes the next shard. A shard's
//! follow-up pages run inside the slot it already holds; they are never new
//! admissions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

use super::admission::AdmissionGate;
use super::aggregator::{Aggregator, HarvestSummary, RecordProcessor};
use super::config::HarvestConfig;
use super::events::{HarvestEvent, HarvestReporter, SilentReporter};
use super::progress::{ProgressState, DEFAULT_PROGRESS_INTERVAL};
use super::retry::RetryGovernor;
use super::shard::{Shard, ShardOutcome, ShardReport, WorkItem};
use super::walker::ShardWalker;
use super::HarvestError;
use crate::fetcher::PageFetcher;
use crate::partition;
use crate::resume::ShardLedger;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};

type ShardQueue = Arc<Mutex<VecDeque<WorkItem>>>;

/// Shortest accepted interval between progress lines
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a sharded harvest
pub struct Harvester {
    config: HarvestConfig,
    shards: Vec<Shard>,
    skipped: usize,
    fetcher: Arc<dyn PageFetcher>,
    processor: Arc<dyn RecordProcessor>,
    shutdown: SharedShutdown,
    reporter: Arc<dyn HarvestReporter>,
    progress_interval: Duration,
}

impl Harvester {
    /// Validate the config and partition the range
    ///
    /// # Errors
    /// Invalid configuration or range fails here, before any request is made.
    pub fn new(
        config: HarvestConfig,
        fetcher: Arc<dyn PageFetcher>,
        processor: Arc<dyn RecordProcessor>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let shards = partition(config.range, config.granularity)?;

        Ok(Self {
            config,
            shards,
            skipped: 0,
            fetcher,
            processor,
            shutdown: ShutdownCoordinator::shared(),
            reporter: Arc::new(SilentReporter),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        })
    }

    /// Attach a shared shutdown handle for cooperative cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Send harvest events to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn HarvestReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Interval between progress log lines, at least one millisecond
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(MIN_PROGRESS_INTERVAL);
        self
    }

    /// Skip shards the ledger marks succeeded and resume the rest from their cursors
    pub fn resume_from(mut self, ledger: &ShardLedger) -> Self {
        let plan = ledger.plan(std::mem::take(&mut self.shards));
        self.shards = plan.shards;
        self.skipped += plan.skipped;
        self
    }

    /// Shards this harvest will walk
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Harvest configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Walk every shard and return the completion summary
    pub async fn run(self) -> HarvestSummary {
        let span = info_span!(
            "harvest",
            fetcher = %self.fetcher.describe(),
            range = %self.config.range,
            granularity = %self.config.granularity
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> HarvestSummary {
        let Harvester {
            config,
            shards,
            skipped,
            fetcher,
            processor,
            shutdown,
            reporter,
            progress_interval,
        } = self;

        let total = shards.len();
        let workers = config.concurrency.min(total);
        reporter.report(HarvestEvent::Started {
            shards: total + skipped,
            skipped,
            workers,
        });

        let plan: Vec<Shard> = shards.clone();
        let queue: ShardQueue = Arc::new(Mutex::new(shards.into_iter().map(WorkItem::new).collect()));
        let gate = AdmissionGate::new(config.concurrency);
        let aggregator = Arc::new(Aggregator::new(processor));
        let governor = RetryGovernor::new(config.retry, shutdown.clone(), reporter.clone());
        let walker = ShardWalker::new(
            fetcher,
            governor,
            aggregator.clone(),
            shutdown.clone(),
            reporter.clone(),
            config.page_size,
        );

        let progress = spawn_progress(aggregator.clone(), total, progress_interval);

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let worker_loop = Worker {
                queue: queue.clone(),
                gate: gate.clone(),
                walker: walker.clone(),
                aggregator: aggregator.clone(),
                shutdown: shutdown.clone(),
                reporter: reporter.clone(),
            };
            set.spawn(worker_loop.run().instrument(info_span!("worker", worker)));
        }
        drop(walker);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Harvest worker terminated abnormally");
            }
        }
        progress.abort();
        if let Err(e) = progress.await {
            if e.is_panic() {
                error!(error = %e, "Progress reporter panicked");
            }
        }

        // Every shard gets exactly one outcome, even if its worker died
        let orphaned = backfill_orphans(&aggregator, &plan);
        if orphaned > 0 {
            error!(orphaned, "Shards left without an outcome were marked failed");
        }

        if let Err(e) = aggregator.flush() {
            error!(error = %e, "Failed to flush record processor");
        }

        let cancelled = shutdown.is_shutdown_requested();
        let mut summary = match Arc::try_unwrap(aggregator) {
            Ok(aggregator) => aggregator.finish(cancelled),
            Err(shared) => {
                error!("Aggregator still shared after all workers finished");
                shared.finish_shared(cancelled)
            }
        };
        summary.skipped = skipped;

        info!(
            peak_active = gate.peak(),
            admitted = gate.admitted(),
            "Admission gate released"
        );
        reporter.report(HarvestEvent::Completed { summary: &summary });
        summary
    }
}

struct Worker {
    queue: ShardQueue,
    gate: AdmissionGate,
    walker: ShardWalker,
    aggregator: Arc<Aggregator>,
    shutdown: SharedShutdown,
    reporter: Arc<dyn HarvestReporter>,
}

impl Worker {
    async fn run(self) {
        while let Some(mut item) = self.next_item() {
            let outcome = self.process(&mut item).await;
            item.finish();

            let report = ShardReport::new(&item.shard, &outcome);
            self.reporter.report(HarvestEvent::ShardFinished { report: &report });
            if let Err(e) = self.aggregator.record_outcome(report) {
                error!(error = %e, "Shard outcome rejected");
            }
        }
    }

    fn next_item(&self) -> Option<WorkItem> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    async fn process(&self, item: &mut WorkItem) -> ShardOutcome {
        if self.shutdown.is_shutdown_requested() {
            return ShardOutcome::NotStarted;
        }

        let permit = tokio::select! {
            permit = self.gate.admit() => permit,
            _ = self.shutdown.wait_for_shutdown() => return ShardOutcome::NotStarted,
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, shard = %item.shard.id(), "Admission failed");
                return ShardOutcome::NotStarted;
            }
        };
        // Cancellation may have landed while waiting for the slot
        if self.shutdown.is_shutdown_requested() {
            return ShardOutcome::NotStarted;
        }

        item.start();
        self.reporter.report(HarvestEvent::ShardAdmitted {
            shard: item.shard.id(),
            active: permit.active_at_admission(),
        });

        let outcome = self.walker.walk(item).await;
        drop(permit);
        outcome
    }
}

/// Record a failure for every planned shard that never reported
///
/// Returns how many shards were backfilled.
fn backfill_orphans(aggregator: &Aggregator, plan: &[Shard]) -> usize {
    let mut orphaned = 0;
    for shard in plan.iter().filter(|shard| !aggregator.has_outcome(shard.id())) {
        let report = ShardReport::new(
            shard,
            &ShardOutcome::Failed {
                error: "worker terminated before the shard finished".to_string(),
            },
        );
        match aggregator.record_outcome(report) {
            Ok(()) => orphaned += 1,
            Err(e) => error!(error = %e, shard = %shard.id(), "Failed to backfill shard outcome"),
        }
    }
    orphaned
}

fn spawn_progress(
    aggregator: Arc<Aggregator>,
    total: usize,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    // tokio::time::interval panics on a zero period
    let interval = interval.max(MIN_PROGRESS_INTERVAL);
    tokio::spawn(async move {
        let mut state = ProgressState::new(total);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.update(aggregator.finished(), aggregator.records());
            info!("{}", state.format_progress());
        }
    })
}
