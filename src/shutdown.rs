//! Cooperative cancellation for running harvests.
//!
//! A [`ShutdownCoordinator`] is shared by the scheduler, every worker and the
//! retry governor. Once cancellation is requested no shard is admitted, no
//! page or retry is started, and pending backoff sleeps wake up early.
//! Requests already on the wire are allowed to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates cancellation across harvest workers.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request cancellation. Waiters are woken exactly once.
    pub fn request_shutdown(&self) {
        self.request_shutdown_with_reason("cancellation requested");
    }

    /// Request cancellation and remember why. Only the first reason is kept.
    pub fn request_shutdown_with_reason(&self, reason: &str) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            if let Ok(mut slot) = self.reason.lock() {
                *slot = Some(reason.to_string());
            }
            tracing::info!(reason, "Harvest cancellation requested");
            self.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Reason passed to the first cancellation request, if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Wait until cancellation is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a request racing with
        // this call cannot be missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the sleep was
    /// cut short (or never started) because of cancellation.
    pub async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}
