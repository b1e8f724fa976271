//! Harvest configuration and retry policy

use crate::{Granularity, KeyPrecision, KeyRange};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::HarvestError;

/// Default number of rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Default number of shards walked at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound on the concurrency ceiling.
/// Every admitted shard holds one open request, so this also caps sockets.
pub const MAX_CONCURRENCY: usize = 64;

/// Default delay before re-issuing a failed page request.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

/// Default total attempts per page request (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// How the delay grows between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles per retry up to `max_delay_ms`
    Exponential {
        /// Ceiling for a single delay
        max_delay_ms: u64,
    },
}

/// Retry policy applied to each page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay before a retry
    pub delay_ms: u64,
    /// Total attempts per request; `None` retries until cancelled
    pub max_attempts: Option<u32>,
    /// Delay growth
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed delay, bounded attempts
    pub fn fixed(delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            delay_ms,
            max_attempts: Some(max_attempts),
            backoff: Backoff::Fixed,
        }
    }

    /// Fixed delay, retry until cancelled
    pub fn unbounded(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }

    /// Switch to exponential backoff capped at `max_delay_ms`
    pub fn exponential(mut self, max_delay_ms: u64) -> Self {
        self.backoff = Backoff::Exponential { max_delay_ms };
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay_ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential { max_delay_ms } => {
                let factor = 2u64.saturating_pow(retry.saturating_sub(1));
                self.delay_ms.saturating_mul(factor).min(max_delay_ms)
            }
        };
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY_MS, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Everything a harvest needs, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Overall range to harvest
    pub range: KeyRange,
    /// Shard width
    pub granularity: Granularity,
    /// Rows per page request
    pub page_size: usize,
    /// Maximum shards fetching at once
    pub concurrency: usize,
    /// Per-page retry policy
    pub retry: RetryPolicy,
}

impl HarvestConfig {
    /// Config with default page size, concurrency and retry policy
    pub fn new(range: KeyRange, granularity: Granularity) -> Self {
        Self {
            range,
            granularity,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the concurrency ceiling
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Key precision the fetcher must render shard bounds at
    pub fn key_precision(&self) -> Result<KeyPrecision, HarvestError> {
        Ok(crate::partition::key_precision(self.range, self.granularity)?)
    }

    /// Validate values that the type system does not already enforce
    pub fn validate(&self) -> Result<(), HarvestError> {
        // Deserialized ranges skip KeyRange::new, so bounds are rechecked here
        crate::partition::key_precision(self.range, self.granularity)?;
        if self.page_size == 0 {
            return Err(HarvestError::InvalidConfig(
                "page size must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(HarvestError::InvalidConfig(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(HarvestError::InvalidConfig(
                "max attempts must be at least 1 (use unbounded retries instead of 0)".to_string(),
            ));
        }
        if let Backoff::Exponential { max_delay_ms } = self.retry.backoff {
            if max_delay_ms < self.retry.delay_ms {
                return Err(HarvestError::InvalidConfig(format!(
                    "backoff cap ({max_delay_ms}ms) is below the base delay ({}ms)",
                    self.retry.delay_ms
                )));
            }
        }
        Ok(())
    }
}
