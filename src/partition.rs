//! Range partitioning into shards
//!
//! Cuts an end-exclusive key range into consecutive, disjoint shards of a
//! fixed width. Boundaries depend only on the range start and the
//! granularity, so partitioning the same range twice always yields the same
//! shard identifiers. The final shard is clipped to the range end and may be
//! shorter than the others.
//!
//! Every boundary must fall on a whole key unit, otherwise two neighbouring
//! shards would render the same key prefix and both claim its records.

use crate::harvest::shard::Shard;
use crate::{format_timestamp, Granularity, KeyPrecision, KeyRange};
use tracing::debug;

/// Upper bound on the number of shards one harvest may plan
pub const MAX_SHARDS: usize = 1_000_000;

/// Partitioning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// Range start is not strictly before its end
    #[error("invalid range: start ({start}) must be before end ({end})")]
    EmptyRange {
        /// Requested start (Unix ms)
        start: i64,
        /// Requested end (Unix ms)
        end: i64,
    },

    /// Granularity is zero, negative or unparseable
    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),

    /// A range bound or the granularity is not a whole number of seconds
    #[error("range {range} with granularity {granularity} is not aligned to whole seconds")]
    Unaligned {
        /// Requested range
        range: String,
        /// Requested granularity
        granularity: String,
    },

    /// The range would be cut into more shards than a harvest may plan
    #[error("range would produce {shards} shards (max: {max}); use a coarser granularity")]
    TooManyShards {
        /// Shards the range would produce
        shards: usize,
        /// Maximum allowed
        max: usize,
    },
}

/// Key precision at which every shard boundary of the partition is exact
///
/// The coarsest unit dividing the granularity and both range bounds. With
/// it, adjacent shards render disjoint key prefixes and no shard reaches
/// outside the range.
///
/// # Errors
/// Everything [`partition`] would reject.
pub fn key_precision(range: KeyRange, granularity: Granularity) -> Result<KeyPrecision, PartitionError> {
    if range.start() >= range.end() {
        return Err(PartitionError::EmptyRange {
            start: range.start(),
            end: range.end(),
        });
    }
    if !granularity.is_valid() {
        return Err(PartitionError::InvalidGranularity(format!(
            "{}ms (must be positive)",
            granularity.as_millis()
        )));
    }

    let shards = shard_count(range, granularity);
    if shards > MAX_SHARDS {
        return Err(PartitionError::TooManyShards {
            shards,
            max: MAX_SHARDS,
        });
    }

    KeyPrecision::aligned_to(&[range.start(), range.end(), granularity.as_millis()]).ok_or_else(
        || PartitionError::Unaligned {
            range: format!(
                "[{}, {})",
                format_timestamp(range.start()),
                format_timestamp(range.end())
            ),
            granularity: granularity.to_string(),
        },
    )
}

/// Split `range` into ordered shards of `granularity` width
///
/// # Errors
/// Returns [`PartitionError::EmptyRange`] if `start >= end`,
/// [`PartitionError::InvalidGranularity`] if the granularity is not positive,
/// [`PartitionError::Unaligned`] if a boundary is not a whole second and
/// [`PartitionError::TooManyShards`] above [`MAX_SHARDS`].
pub fn partition(range: KeyRange, granularity: Granularity) -> Result<Vec<Shard>, PartitionError> {
    let precision = key_precision(range, granularity)?;

    let step = granularity.as_millis();
    let mut shards = Vec::with_capacity(shard_count(range, granularity));
    let mut current = range.start();

    while current < range.end() {
        let shard_end = current.saturating_add(step).min(range.end());
        // Bounds are already ordered, KeyRange::new cannot fail here
        let bounds = KeyRange::new(current, shard_end)?;
        shards.push(Shard::new(bounds));
        current = shard_end;
    }

    debug!(
        range = %range,
        granularity = %granularity,
        precision = ?precision,
        shards = shards.len(),
        "Partitioned range into shards"
    );

    Ok(shards)
}

/// Number of shards `partition` will produce for a valid range
pub fn shard_count(range: KeyRange, granularity: Granularity) -> usize {
    if !granularity.is_valid() || range.start() >= range.end() {
        return 0;
    }
    let span = range.duration_ms() as u64;
    span.div_ceil(granularity.as_millis() as u64) as usize
}
