//! Harvest command implementation

use crate::fetcher::couch_view::{CouchViewConfig, CouchViewFetcher};
use crate::harvest::config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_PAGE_SIZE,
    DEFAULT_RETRY_DELAY_MS, MAX_CONCURRENCY,
};
use crate::harvest::{HarvestConfig, HarvestSummary, Harvester, RecordProcessor, RetryPolicy};
use crate::output::{FileWriter, OutputFormat as RecordFormat, SharedWriter};
use crate::resume::ShardLedger;
use crate::shutdown::SharedShutdown;
use crate::{Granularity, KeyPrecision, KeyRange, Record};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{Cli, CliError, OutputFormat, ProgressBarReporter, RangeArgs};

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

fn parse_page_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("page size must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("'{s}' is not a valid number")),
    }
}

/// Arguments for harvesting a view
#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Server base URL (e.g. http://localhost:5984)
    #[arg(long, env = "VIEW_HARVESTER_URL")]
    pub url: String,

    /// Database name
    #[arg(long)]
    pub db: String,

    /// Design document name, without the `_design/` prefix
    #[arg(long)]
    pub design: String,

    /// View name
    #[arg(long)]
    pub view: String,

    /// Range and shard width
    #[command(flatten)]
    pub range: RangeArgs,

    /// Rows requested per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = parse_page_size)]
    pub page_size: usize,

    /// Shards walked at once (max 64)
    ///
    /// Every admitted shard holds one open request, so this also bounds the
    /// load placed on the server.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Delay before re-issuing a failed page request, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    /// Total attempts per page request; 0 retries until cancelled
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Double the retry delay after every failure
    #[arg(long, default_value_t = false)]
    pub exponential_backoff: bool,

    /// Ceiling for a single exponential backoff delay, in milliseconds
    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_MS)]
    pub max_backoff_ms: u64,

    /// Ask the view for the full documents
    #[arg(long, default_value_t = false)]
    pub include_docs: bool,

    /// Basic auth user
    #[arg(long, env = "VIEW_HARVESTER_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "VIEW_HARVESTER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Write records to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Record file format (csv or jsonl)
    #[arg(long, default_value = "csv")]
    pub format: RecordFormat,

    /// Shard ledger file recording per-shard outcomes
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Skip shards the ledger marks succeeded and resume the rest
    #[arg(long, default_value_t = false, requires = "ledger")]
    pub resume: bool,

    /// Seconds between progress log lines
    #[arg(long, default_value_t = 30)]
    pub progress_interval_secs: u64,
}

impl HarvestArgs {
    /// Retry policy from the command line
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = if self.max_attempts == 0 {
            RetryPolicy::unbounded(self.retry_delay_ms)
        } else {
            RetryPolicy::fixed(self.retry_delay_ms, self.max_attempts)
        };
        if self.exponential_backoff {
            policy.exponential(self.max_backoff_ms)
        } else {
            policy
        }
    }

    fn harvest_config(&self, range: KeyRange, granularity: Granularity) -> HarvestConfig {
        HarvestConfig::new(range, granularity)
            .with_page_size(self.page_size)
            .with_concurrency(self.concurrency)
            .with_retry(self.retry_policy())
    }

    fn view_config(&self, precision: KeyPrecision) -> CouchViewConfig {
        let config = CouchViewConfig::new(&self.url, &self.db, &self.design, &self.view)
            .with_precision(precision)
            .with_include_docs(self.include_docs);
        match &self.username {
            Some(username) => config.with_credentials(username, self.password.clone()),
            None => config,
        }
    }

    /// Load the ledger to resume from, or start a fresh one
    ///
    /// Returns the ledger and whether it came from disk.
    fn open_ledger(
        &self,
        view: &str,
        config: &HarvestConfig,
    ) -> Result<Option<(ShardLedger, bool)>, CliError> {
        let Some(path) = &self.ledger else {
            return Ok(None);
        };

        if self.resume && path.exists() {
            let ledger = ShardLedger::load(path)?;
            ledger.ensure_scope(view, config)?;
            info!(
                "Resuming from ledger {:?}: {} recorded shard(s), {} pending",
                path,
                ledger.entries().len(),
                ledger.pending()
            );
            return Ok(Some((ledger, true)));
        }

        if path.exists() {
            warn!("Ledger {:?} exists and --resume was not given; it will be replaced", path);
        }
        Ok(Some((ShardLedger::new(view, config), false)))
    }

    /// Execute the harvest
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let range = self.range.key_range()?;
        let granularity = self.range.granularity()?;
        let config = self.harvest_config(range, granularity);
        config.validate()?;

        let view_config = self.view_config(config.key_precision()?);
        let view = view_config.view_url();
        let fetcher = CouchViewFetcher::new(view_config)?;

        let ledger = self.open_ledger(&view, &config)?;
        let appending = ledger.as_ref().is_some_and(|(_, loaded)| *loaded);

        let writer = match &self.output {
            Some(path) => {
                let writer = if appending {
                    FileWriter::append(path, self.format)?
                } else {
                    FileWriter::create(path, self.format)?
                };
                Some(Arc::new(SharedWriter::new(writer)))
            }
            None => {
                warn!("No --output given; records will be counted but not stored");
                None
            }
        };
        let processor: Arc<dyn RecordProcessor> = match &writer {
            Some(writer) => writer.clone(),
            None => Arc::new(|_records: &[Record]| {}),
        };

        let reporter = Arc::new(match cli.output_format {
            OutputFormat::Human => ProgressBarReporter::new(format!("Harvesting {view}")),
            OutputFormat::Json => ProgressBarReporter::hidden(),
        });

        let mut harvester = Harvester::new(config, Arc::new(fetcher), processor)?
            .with_shutdown(shutdown)
            .with_reporter(reporter.clone())
            .with_progress_interval(Duration::from_secs(self.progress_interval_secs.max(1)));
        if let Some((ledger, true)) = &ledger {
            harvester = harvester.resume_from(ledger);
        }

        info!(
            "Harvesting {} over {} by {} with concurrency {}",
            view, range, granularity, self.concurrency
        );
        let summary = harvester.run().await;
        reporter.finish();

        let written = match writer {
            Some(writer) => Some(writer.close()?),
            None => None,
        };

        if let (Some((mut ledger, _)), Some(path)) = (ledger, &self.ledger) {
            ledger.record_summary(&summary);
            ledger.save(path)?;
            info!("Ledger saved to {:?}", path);
        }

        match cli.output_format {
            OutputFormat::Json => output_json(&view, &summary, written, self.output.as_ref()),
            OutputFormat::Human => output_human(&view, &summary, written, self.output.as_ref()),
        }

        if summary.is_success() {
            Ok(())
        } else {
            Err(CliError::Incomplete {
                status: summary.status,
                failed: summary.failed.len(),
                not_started: summary.not_started,
            })
        }
    }
}

/// Output the summary as JSON
fn output_json(
    view: &str,
    summary: &HarvestSummary,
    written: Option<u64>,
    output: Option<&PathBuf>,
) {
    let output = serde_json::json!({
        "success": summary.is_success(),
        "view": view,
        "output_path": output.map(|p| p.display().to_string()),
        "records_written": written,
        "summary": summary,
    });

    match serde_json::to_string(&output) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Failed to serialize summary: {}", e),
    }
}

/// Output the summary in human-readable format
fn output_human(
    view: &str,
    summary: &HarvestSummary,
    written: Option<u64>,
    output: Option<&PathBuf>,
) {
    if summary.is_success() {
        println!("\nHarvest completed successfully!");
    } else {
        eprintln!("\nHarvest {}!", summary.status);
    }
    println!("View: {view}");
    if let Some(path) = output {
        println!("Output: {}", path.display());
    }
    println!(
        "Shards: {} succeeded, {} failed, {} cancelled, {} not started, {} skipped",
        summary.succeeded,
        summary.failed.len(),
        summary.cancelled,
        summary.not_started,
        summary.skipped
    );
    println!("Pages: {}", summary.pages);
    println!("Records: {}", summary.records);
    if let Some(written) = written {
        println!("Records written: {written}");
    }
    if summary.retries > 0 {
        println!("Retries: {}", summary.retries);
    }
    for failed in &summary.failed {
        eprintln!("  {} failed: {}", failed.id, failed.error);
    }
}
