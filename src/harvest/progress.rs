//! Periodic progress lines for long harvests.
//!
//! Completion is measured in shards; the rate is measured in records. The
//! scheduler feeds a [`ProgressState`] from the aggregator and logs
//! [`ProgressState::format_progress`] on a fixed cadence.

use std::time::Duration;
use tokio::time::Instant;

/// Default interval between progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Progress of a running harvest.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Shards in this run (skipped shards excluded).
    pub total_shards: usize,
    /// Shards with a terminal outcome.
    pub finished_shards: usize,
    /// Records delivered so far.
    pub records: u64,
    /// Records per second since the start.
    pub current_rate: f64,
    /// When the harvest started.
    pub start_time: Instant,
}

impl ProgressState {
    /// Fresh state for `total_shards` shards.
    pub fn new(total_shards: usize) -> Self {
        Self {
            total_shards,
            finished_shards: 0,
            records: 0,
            current_rate: 0.0,
            start_time: Instant::now(),
        }
    }

    /// Refresh counters.
    pub fn update(&mut self, finished_shards: usize, records: u64) {
        self.finished_shards = finished_shards.min(self.total_shards);
        self.records = records;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = records as f64 / elapsed;
        }
    }

    /// Shard completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_shards == 0 {
            return 100.0;
        }
        self.finished_shards as f64 / self.total_shards as f64 * 100.0
    }

    /// Remaining time, extrapolated from the shard completion rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.finished_shards == 0 || self.finished_shards >= self.total_shards {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let per_shard = elapsed / self.finished_shards as f64;
        let remaining = (self.total_shards - self.finished_shards) as f64 * per_shard;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} shards - {:.1}% complete - {} records",
            self.finished_shards,
            self.total_shards,
            self.percentage(),
            self.records
        )];

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.0} records/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration for progress lines ("45s", "12m", "2.5h").
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
