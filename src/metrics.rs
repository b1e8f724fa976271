//! Harvest observability metrics
//!
//! Counters, gauges and histograms for page requests, retries, shard outcomes
//! and admission pressure.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade; without an installed recorder every call is a
//!   no-op, so library callers pay nothing
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::harvest::shard::ShardStatus;
use crate::ShardId;

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "view_pages_total",
        Unit::Count,
        "Page requests issued to the view, labelled by result"
    );
    describe_counter!(
        "view_records_total",
        Unit::Count,
        "Records handed to the record processor"
    );
    describe_counter!(
        "view_retries_total",
        Unit::Count,
        "Page requests re-issued after a transient failure"
    );
    describe_histogram!(
        "view_page_duration_seconds",
        Unit::Seconds,
        "Page request duration in seconds"
    );
    describe_histogram!(
        "view_retry_delay_seconds",
        Unit::Seconds,
        "Delay before a retried page request"
    );
    describe_counter!(
        "view_shards_total",
        Unit::Count,
        "Shards reaching a terminal state, labelled by status"
    );
    describe_gauge!(
        "view_active_shards",
        Unit::Count,
        "Shards currently holding an admission permit"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the Prometheus exporter has been installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Timing for one page request
pub struct PageRequestMetrics {
    shard: ShardId,
    start_time: Instant,
}

impl PageRequestMetrics {
    /// Start timing a page request
    pub fn start(shard: ShardId) -> Self {
        Self {
            shard,
            start_time: Instant::now(),
        }
    }

    /// Record a successful page
    pub fn record_success(&self, records: usize) {
        self.record("ok");
        debug!(
            shard = %self.shard,
            records,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Page request completed"
        );
    }

    /// Record a failed page request
    pub fn record_failure(&self, transient: bool) {
        self.record(if transient { "transient" } else { "fatal" });
    }

    fn record(&self, result: &'static str) {
        counter!("view_pages_total", "result" => result).increment(1);
        histogram!("view_page_duration_seconds").record(self.start_time.elapsed().as_secs_f64());
    }
}

/// Record a retry and its delay
pub fn record_retry(delay: Duration, retry: u32) {
    counter!("view_retries_total").increment(1);
    histogram!("view_retry_delay_seconds").record(delay.as_secs_f64());

    debug!(
        retry,
        delay_ms = delay.as_millis() as u64,
        "Retry recorded"
    );
}

/// Record records handed to the processor
pub fn record_records(count: usize) {
    counter!("view_records_total").increment(count as u64);
}

/// Record a shard reaching a terminal state
pub fn record_shard(status: ShardStatus) {
    counter!("view_shards_total", "status" => status.to_string()).increment(1);
}

/// Update the active shard gauge
pub fn set_active_shards(active: usize) {
    gauge!("view_active_shards").set(active as f64);
}
