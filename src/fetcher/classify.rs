//! Failure classification for view requests.
//!
//! Maps HTTP statuses and transport errors onto the transient / fatal split
//! the retry governor acts on, and carries the wording used in retry logs and
//! in the final failure summary.

use reqwest::{Error as ReqwestError, StatusCode};

use super::FetchError;

/// Classification of a failed view request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Request or connect timeout
    NetworkTimeout,
    /// Connection refused, reset, DNS failure
    NetworkOffline,
    /// HTTP 429
    Throttled,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 400: the view rejected the query parameters
    InvalidRequest,
    /// HTTP 401/403
    AuthFailed(u16),
    /// HTTP 404: database, design document or view missing
    NotFound,
    /// Any other 4xx
    ClientError(u16),
    /// Generic transport failure with no better classification
    NetworkGeneric,
}

impl FailureKind {
    /// User-facing description used in retry and failure messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::Throttled => "request throttled",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "query rejected",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "access denied (403)",
                _ => "authentication failed",
            },
            Self::NotFound => "view not found",
            Self::ClientError(_) => "client error",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation shown once a shard has failed for good.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Raise the request timeout or lower --page-size",
            Self::NetworkOffline => "Verify the server URL and that the database is reachable",
            Self::Throttled => "Lower --concurrency or raise --retry-delay-ms",
            Self::ServerError(_) => "The server may be overloaded or rebuilding the view index",
            Self::InvalidRequest => "Check that the view is keyed by ISO-8601 timestamps",
            Self::AuthFailed(_) => "Check --username/--password and the database security object",
            Self::NotFound => "Check --db, --design and --view",
            Self::ClientError(_) => "Review the request parameters",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether a request failing this way may be re-issued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::Throttled
                | Self::ServerError(_)
                | Self::NetworkGeneric
        )
    }

    /// Wrap `detail` into the matching [`FetchError`] variant.
    ///
    /// Fatal errors carry the remediation hint since they end the shard.
    pub fn into_error(self, detail: impl std::fmt::Display) -> FetchError {
        if self.is_retryable() {
            FetchError::Transient(format!("{}: {}", self.description(), detail))
        } else {
            FetchError::Fatal(format!(
                "{}: {} ({})",
                self.description(),
                detail,
                self.suggestion()
            ))
        }
    }
}

/// Classify an HTTP status code.
pub fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    Some(match code {
        400 => FailureKind::InvalidRequest,
        401 | 403 => FailureKind::AuthFailed(code),
        404 => FailureKind::NotFound,
        408 => FailureKind::NetworkTimeout,
        429 => FailureKind::Throttled,
        _ if status.is_server_error() => FailureKind::ServerError(code),
        _ => FailureKind::ClientError(code),
    })
}

/// Classify a transport-level error.
pub fn classify_transport(err: &ReqwestError) -> FailureKind {
    if let Some(status) = err.status() {
        if let Some(kind) = classify_status(status) {
            return kind;
        }
    }
    if err.is_timeout() {
        return FailureKind::NetworkTimeout;
    }
    if err.is_connect() {
        return FailureKind::NetworkOffline;
    }
    FailureKind::NetworkGeneric
}
