//! CouchDB-style `_view` fetcher
//!
//! Issues one `GET {base}/{db}/_design/{ddoc}/_view/{view}` per page with
//! JSON-encoded key bounds. Continuation requests resume at the cursor key
//! with `startkey_docid` and `skip=1`, which excludes the boundary row.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::classify::{classify_status, classify_transport};
use super::shared_resources::global_http_client;
use super::{FetchError, FetchResult, KeyBounds, Page, PageFetcher, PageRequest};
use crate::{KeyPrecision, Record};

/// Connection settings for a single view
#[derive(Debug, Clone)]
pub struct CouchViewConfig {
    /// Server root, e.g. `http://localhost:5984`
    pub base_url: String,
    /// Database name
    pub db: String,
    /// Design document name (without the `_design/` prefix)
    pub design: String,
    /// View name
    pub view: String,
    /// Precision of the view's keys
    pub precision: KeyPrecision,
    /// Request embedded documents (`include_docs=true`)
    pub include_docs: bool,
    /// Basic-auth username
    pub username: Option<String>,
    /// Basic-auth password
    pub password: Option<String>,
}

impl CouchViewConfig {
    /// Config for a day-keyed view without documents or credentials
    pub fn new(
        base_url: impl Into<String>,
        db: impl Into<String>,
        design: impl Into<String>,
        view: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            db: db.into(),
            design: design.into(),
            view: view.into(),
            precision: KeyPrecision::Day,
            include_docs: false,
            username: None,
            password: None,
        }
    }

    /// Set the key precision
    pub fn with_precision(mut self, precision: KeyPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Request embedded documents
    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    /// Set basic-auth credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Full view URL
    pub fn view_url(&self) -> String {
        format!(
            "{}/{}/_design/{}/_view/{}",
            self.base_url.trim_end_matches('/'),
            self.db,
            self.design,
            self.view
        )
    }
}

/// Fetches view pages over HTTP
pub struct CouchViewFetcher {
    client: Arc<Client>,
    config: CouchViewConfig,
    url: String,
}

impl CouchViewFetcher {
    /// Create a fetcher on the shared HTTP client
    ///
    /// # Errors
    /// Returns [`FetchError::Fatal`] if the URL is not http(s) or the client
    /// cannot be built.
    pub fn new(config: CouchViewConfig) -> FetchResult<Self> {
        Self::with_client(global_http_client()?, config)
    }

    /// Create a fetcher on a caller-supplied client
    pub fn with_client(client: Arc<Client>, config: CouchViewConfig) -> FetchResult<Self> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(FetchError::Fatal(format!(
                "base URL must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }
        if config.db.is_empty() || config.design.is_empty() || config.view.is_empty() {
            return Err(FetchError::Fatal(
                "database, design document and view must not be empty".to_string(),
            ));
        }
        let url = config.view_url();
        Ok(Self { client, config, url })
    }

    /// Fetcher configuration
    pub fn config(&self) -> &CouchViewConfig {
        &self.config
    }
}

#[async_trait]
impl PageFetcher for CouchViewFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> FetchResult<Page> {
        let params = build_query_params(request, self.config.precision, self.config.include_docs)?;

        let mut builder = self.client.get(&self.url).query(&params);
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_deref());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            let kind = classify_transport(&e);
            warn!(shard = %request.shard, error = %e, "View request failed: {}", kind.description());
            kind.into_error(e)
        })?;

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(kind.into_error(format!("HTTP {} {}", status.as_u16(), truncate(&body, 200))));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&e).into_error(e))?;
        let page = parse_view_response(&body)?;

        debug!(
            shard = %request.shard,
            rows = page.records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched view page"
        );
        Ok(page)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Build the query string for one page request
///
/// Key parameters are JSON-encoded as the view API expects. The upper bound
/// always comes from the shard range; the lower bound comes from the cursor
/// when one is present.
pub fn build_query_params(
    request: &PageRequest,
    precision: KeyPrecision,
    include_docs: bool,
) -> FetchResult<Vec<(&'static str, String)>> {
    if request.limit == 0 {
        return Err(FetchError::Fatal("page limit must be positive".to_string()));
    }
    let bounds = KeyBounds::for_range(request.range, precision);
    let encode = |value: &str| {
        serde_json::to_string(value)
            .map_err(|e| FetchError::Fatal(format!("failed to encode key: {e}")))
    };

    let mut params = Vec::with_capacity(7);
    match &request.cursor {
        Some(cursor) => {
            params.push(("startkey", encode(&cursor.key)?));
            params.push(("startkey_docid", cursor.id.clone()));
            params.push(("skip", "1".to_string()));
        }
        None => params.push(("startkey", encode(&bounds.start_key)?)),
    }
    params.push(("endkey", encode(&bounds.end_key)?));
    params.push(("limit", request.limit.to_string()));
    params.push(("reduce", "false".to_string()));
    if include_docs {
        params.push(("include_docs", "true".to_string()));
    }
    Ok(params)
}

#[derive(Debug, Deserialize)]
struct ViewResponse {
    rows: Vec<ViewRow>,
}

#[derive(Debug, Deserialize)]
struct ViewRow {
    id: Option<String>,
    key: serde_json::Value,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    doc: Option<serde_json::Value>,
}

/// Parse a view response body into a page
///
/// # Errors
/// Malformed JSON, rows without a document id and non-string keys are
/// [`FetchError::Fatal`]: the view is not one this harvester can page.
pub fn parse_view_response(body: &str) -> FetchResult<Page> {
    let response: ViewResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Fatal(format!("malformed view response: {e}")))?;

    let records = response
        .rows
        .into_iter()
        .map(|row| {
            let id = row
                .id
                .ok_or_else(|| FetchError::Fatal("view row without document id".to_string()))?;
            let key = match row.key {
                serde_json::Value::String(key) => key,
                other => {
                    return Err(FetchError::Fatal(format!(
                        "view key for '{id}' is not a string: {other}"
                    )))
                }
            };
            Ok(Record {
                id,
                key,
                value: row.value,
                doc: row.doc.filter(|doc| !doc.is_null()),
            })
        })
        .collect::<FetchResult<Vec<_>>>()?;

    Ok(Page::from_records(records))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
