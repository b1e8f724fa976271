//! Plan command: show the shards a harvest would walk

use crate::format_timestamp;
use crate::harvest::ShardStatus;
use crate::partition;
use crate::resume::ShardLedger;
use clap::Args;
use std::path::PathBuf;
use tracing::error;

use super::{Cli, CliError, OutputFormat, RangeArgs};

/// Arguments for printing a shard plan
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Range and shard width
    #[command(flatten)]
    pub range: RangeArgs,

    /// Annotate each shard with its status from this ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

impl PlanArgs {
    /// Print the plan
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let range = self.range.key_range()?;
        let granularity = self.range.granularity()?;
        let shards = partition(range, granularity)?;
        let precision = partition::key_precision(range, granularity)?;

        let ledger = match &self.ledger {
            Some(path) if path.exists() => Some(ShardLedger::load(path)?),
            _ => None,
        };
        let status_of = |shard: &crate::harvest::Shard| -> Option<ShardStatus> {
            ledger
                .as_ref()
                .and_then(|ledger| ledger.entry(shard.id()))
                .map(|entry| entry.status)
        };

        match cli.output_format {
            OutputFormat::Json => {
                let rows: Vec<_> = shards
                    .iter()
                    .map(|shard| {
                        serde_json::json!({
                            "id": shard.id().to_string(),
                            "start": shard.range().start(),
                            "end": shard.range().end(),
                            "status": status_of(shard).map(|s| s.to_string()),
                        })
                    })
                    .collect();
                let output = serde_json::json!({
                    "range": range.to_string(),
                    "granularity": granularity.to_string(),
                    "key_precision": precision,
                    "shards": rows,
                });
                match serde_json::to_string(&output) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Failed to serialize plan: {}", e),
                }
            }
            OutputFormat::Human => {
                println!(
                    "{} shard(s) over {} by {} (keys at {:?} precision)",
                    shards.len(),
                    range,
                    granularity,
                    precision
                );
                for shard in &shards {
                    let status = status_of(shard)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {} .. {}  {}",
                        shard.id(),
                        format_timestamp(shard.range().start()),
                        format_timestamp(shard.range().end()),
                        status
                    );
                }
            }
        }
        Ok(())
    }
}
