//! Range arguments shared by `harvest` and `plan`

use crate::{Granularity, KeyRange};
use chrono::{DateTime, NaiveDate};
use clap::Args;

use super::CliError;

/// Time range and shard width
#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// Range start, inclusive (YYYY-MM-DD or RFC3339)
    #[arg(long)]
    pub start: String,

    /// Range end, exclusive (YYYY-MM-DD or RFC3339)
    #[arg(long)]
    pub end: String,

    /// Shard width, e.g. 1d, 6h, 15m
    #[arg(long, default_value = "1d")]
    pub granularity: String,
}

impl RangeArgs {
    /// Parse the range bounds
    pub fn key_range(&self) -> Result<KeyRange, CliError> {
        let start = parse_time_flexible(&self.start, "start")?;
        let end = parse_time_flexible(&self.end, "end")?;
        Ok(KeyRange::new(start, end)?)
    }

    /// Parse the shard width
    pub fn granularity(&self) -> Result<Granularity, CliError> {
        Ok(self.granularity.parse::<Granularity>()?)
    }
}

/// Try to parse datetime from RFC3339 format
///
/// Inputs without a timezone designator are taken as UTC.
fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp_millis());
    }

    None
}

/// Parse a bound from YYYY-MM-DD (midnight UTC) or RFC3339
///
/// Both bounds use midnight for date-only input: the range end is exclusive,
/// so `--end 2018-02-01` stops at the last instant of January.
pub(crate) fn parse_time_flexible(input: &str, label: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid {label} time: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument(format!("Invalid {label} time")))?;
    Ok(datetime.and_utc().timestamp_millis())
}
