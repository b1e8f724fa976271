//! CLI error types and conversions

use crate::fetcher::FetchError;
use crate::harvest::{HarvestError, HarvestStatus};
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::PartitionError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Harvest could not be constructed
    #[error("harvest error: {0}")]
    HarvestError(#[from] HarvestError),

    /// Range or granularity error
    #[error("partition error: {0}")]
    PartitionError(#[from] PartitionError),

    /// Fetcher construction error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetchError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Ledger error
    #[error("ledger error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Harvest ran but did not complete every shard
    #[error("harvest {status}: {failed} shard(s) failed, {not_started} not started")]
    Incomplete {
        /// Final harvest status
        status: HarvestStatus,
        /// Failed shard count
        failed: usize,
        /// Shards never admitted
        not_started: usize,
    },
}
