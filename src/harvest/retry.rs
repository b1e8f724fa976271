//! Retry governor
//!
//! Wraps one fallible page request. Transient failures are retried after the
//! policy delay, fatal ones are returned at once. The retry counter lives on
//! the [`WorkItem`], so a struggling shard never consumes budget that belongs
//! to its siblings.

use std::future::Future;
use std::sync::Arc;

use super::config::RetryPolicy;
use super::events::{HarvestEvent, HarvestReporter};
use super::shard::WorkItem;
use crate::fetcher::{FetchError, FetchResult};
use crate::metrics;
use crate::shutdown::SharedShutdown;

/// Why a governed operation gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// Bounded policy ran out of attempts
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made, first try included
        attempts: u32,
        /// Error from the final attempt
        last: FetchError,
    },

    /// Non-retryable failure
    #[error("{0}")]
    Fatal(FetchError),

    /// Cancellation arrived before or during a retry delay
    #[error("cancelled while retrying")]
    Cancelled,
}

/// Applies a [`RetryPolicy`] to page requests
#[derive(Clone)]
pub struct RetryGovernor {
    policy: RetryPolicy,
    shutdown: SharedShutdown,
    reporter: Arc<dyn HarvestReporter>,
}

impl RetryGovernor {
    /// Create a governor
    pub fn new(
        policy: RetryPolicy,
        shutdown: SharedShutdown,
        reporter: Arc<dyn HarvestReporter>,
    ) -> Self {
        Self {
            policy,
            shutdown,
            reporter,
        }
    }

    /// Policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or the
    /// harvest is cancelled
    ///
    /// Every retry increments the item's retry counter and emits one
    /// [`HarvestEvent::Retry`].
    pub async fn run<T, F, Fut>(&self, item: &mut WorkItem, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let shard = item.shard.id();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error @ FetchError::Fatal(_)) => return Err(RetryError::Fatal(error)),
                Err(error) => error,
            };

            if !self.policy.allows_another(attempts) {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }
            if self.shutdown.is_shutdown_requested() {
                return Err(RetryError::Cancelled);
            }

            item.begin_retry();
            let delay = self.policy.delay_for(attempts);
            metrics::record_retry(delay, attempts);
            self.reporter.report(HarvestEvent::Retry {
                shard,
                retry: attempts,
                delay,
                error: &error,
            });

            if !self.shutdown.sleep_or_shutdown(delay).await {
                return Err(RetryError::Cancelled);
            }
            item.resume();
        }
    }
}
