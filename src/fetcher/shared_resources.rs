//! Shared HTTP client for view fetchers
//!
//! All fetchers built by the CLI reuse one connection pool so the
//! concurrency ceiling, not the number of fetcher instances, decides how many
//! sockets are open.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::{FetchError, FetchResult};

/// HTTP connect timeout (seconds)
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds), covering the full page download
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

static GLOBAL_HTTP_CLIENT: Lazy<Result<Arc<Client>, String>> = Lazy::new(|| {
    build_http_client(
        Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
        Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
    )
    .map(Arc::new)
    .map_err(|e| e.to_string())
});

/// Build a client with explicit connect and request timeouts
pub fn build_http_client(connect_timeout: Duration, request_timeout: Duration) -> FetchResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .user_agent(concat!("view-harvester/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::Fatal(format!("failed to build HTTP client: {e}")))
}

/// Get the shared HTTP client
///
/// Returns a clone of the Arc, which only increments the reference count.
pub fn global_http_client() -> FetchResult<Arc<Client>> {
    GLOBAL_HTTP_CLIENT
        .as_ref()
        .map(Arc::clone)
        .map_err(|e| FetchError::Fatal(format!("failed to build HTTP client: {e}")))
}
