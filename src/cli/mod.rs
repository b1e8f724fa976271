//! CLI command implementations

pub mod error;
pub mod harvest;
pub mod plan;
pub mod range;
pub mod reporter;

pub use error::CliError;
pub use harvest::HarvestArgs;
pub use plan::PlanArgs;
pub use range::RangeArgs;
pub use reporter::ProgressBarReporter;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

/// View Harvester CLI
#[derive(Parser, Debug)]
#[command(name = "view-harvester")]
#[command(about = "Harvest time-ordered records from a CouchDB-style view", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format for summaries (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Expose Prometheus metrics on this address (e.g. 0.0.0.0:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest a view range shard by shard
    Harvest(HarvestArgs),

    /// Print the shard plan for a range without fetching
    Plan(PlanArgs),
}

/// Summary output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
