//! Terminal progress reporting

use crate::harvest::{HarvestEvent, HarvestReporter, TracingReporter};
use indicatif::{ProgressBar, ProgressStyle};

/// Drives a shard progress bar and forwards every event to [`TracingReporter`]
pub struct ProgressBarReporter {
    bar: ProgressBar,
    logs: TracingReporter,
}

impl ProgressBarReporter {
    /// Visible progress bar on stderr
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shards ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(message.into());
        Self {
            bar,
            logs: TracingReporter,
        }
    }

    /// Reporter without a visible bar, for machine-readable output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            logs: TracingReporter,
        }
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl HarvestReporter for ProgressBarReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match &event {
            HarvestEvent::Started {
                shards, skipped, ..
            } => {
                self.bar.set_length(shards.saturating_sub(*skipped) as u64);
            }
            HarvestEvent::ShardFinished { .. } => self.bar.inc(1),
            HarvestEvent::Completed { .. } => self.bar.finish_and_clear(),
            _ => {}
        }
        self.logs.report(event);
    }
}
