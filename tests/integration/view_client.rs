//! CouchDB view client against a local HTTP server

use std::sync::Arc;
use view_harvester::fetcher::couch_view::{CouchViewConfig, CouchViewFetcher};
use view_harvester::fetcher::{FetchError, PageFetcher, PageRequest};
use view_harvester::harvest::{HarvestConfig, Harvester};
use view_harvester::{Cursor, Granularity, KeyRange, ShardId, DAY_MS};

use super::common::{spawn_http_server, CollectingProcessor, JAN_1_2018};

fn fetcher(base_url: &str) -> CouchViewFetcher {
    let config = CouchViewConfig::new(base_url, "events", "by_time", "timestamp");
    CouchViewFetcher::with_client(Arc::new(reqwest::Client::new()), config).unwrap()
}

fn first_day_request(cursor: Option<Cursor>, limit: usize) -> PageRequest {
    PageRequest {
        shard: ShardId::new(JAN_1_2018),
        range: KeyRange::new(JAN_1_2018, JAN_1_2018 + DAY_MS).unwrap(),
        cursor,
        limit,
    }
}

#[tokio::test]
async fn test_fetch_page_sends_range_query() {
    let (url, seen) = spawn_http_server(|_| {
        (
            200,
            r#"{"total_rows":2,"offset":0,"rows":[
                {"id":"a","key":"2018-01-01T10:00:00Z","value":1},
                {"id":"b","key":"2018-01-01T11:00:00Z","value":2}
            ]}"#
            .to_string(),
        )
    })
    .await;

    let page = fetcher(&url)
        .fetch_page(&first_day_request(None, 2))
        .await
        .unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next, Some(Cursor::new("2018-01-01T11:00:00Z", "b")));

    let requests = seen.lock().unwrap().clone();
    let target = requests[0].lines().next().unwrap().to_string();
    assert!(target.starts_with("GET /events/_design/by_time/_view/timestamp?"));
    assert!(target.contains("startkey=%222018-01-01%22"));
    assert!(target.contains("endkey=%222018-01-01%EF%BF%B0%22"));
    assert!(target.contains("limit=2"));
    assert!(target.contains("reduce=false"));
    assert!(!target.contains("skip="));
}

#[tokio::test]
async fn test_continuation_uses_docid_and_skip() {
    let (url, seen) = spawn_http_server(|_| (200, r#"{"rows":[]}"#.to_string())).await;

    let cursor = Cursor::new("2018-01-01T11:00:00Z", "b");
    let page = fetcher(&url)
        .fetch_page(&first_day_request(Some(cursor), 2))
        .await
        .unwrap();
    assert!(page.is_exhausted());

    let requests = seen.lock().unwrap().clone();
    let target = requests[0].lines().next().unwrap().to_string();
    assert!(target.contains("startkey=%222018-01-01T11%3A00%3A00Z%22"));
    assert!(target.contains("startkey_docid=b"));
    assert!(target.contains("skip=1"));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let (url, seen) = spawn_http_server(|_| (200, r#"{"rows":[]}"#.to_string())).await;
    let config = CouchViewConfig::new(&url, "events", "by_time", "timestamp")
        .with_credentials("harvester", Some("secret".to_string()));
    let fetcher = CouchViewFetcher::with_client(Arc::new(reqwest::Client::new()), config).unwrap();

    fetcher.fetch_page(&first_day_request(None, 10)).await.unwrap();

    let head = seen.lock().unwrap()[0].to_lowercase();
    assert!(head.contains("authorization: basic "));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let (url, _) = spawn_http_server(|_| (503, r#"{"error":"unavailable"}"#.to_string())).await;
    let err = fetcher(&url)
        .fetch_page(&first_day_request(None, 10))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(err.message().contains("HTTP 503"));

    let (url, _) = spawn_http_server(|_| (429, String::new())).await;
    let err = fetcher(&url)
        .fetch_page(&first_day_request(None, 10))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn test_client_errors_are_fatal() {
    for status in [400u16, 401, 404] {
        let (url, _) = spawn_http_server(move |_| (status, r#"{"error":"nope"}"#.to_string())).await;
        let err = fetcher(&url)
            .fetch_page(&first_day_request(None, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Fatal(_)), "{status}: {err}");
    }
}

#[tokio::test]
async fn test_malformed_body_is_fatal() {
    let (url, _) = spawn_http_server(|_| (200, "<html>proxy error</html>".to_string())).await;
    let err = fetcher(&url)
        .fetch_page(&first_day_request(None, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Fatal(_)));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Bind and drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher(&format!("http://{addr}"))
        .fetch_page(&first_day_request(None, 10))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn test_harvest_over_http() {
    // Serves three rows for the first day and nothing after the cursor
    let (url, seen) = spawn_http_server(|target| {
        if target.contains("startkey=%222018-01-01%22") {
            (
                200,
                r#"{"rows":[
                    {"id":"a","key":"2018-01-01T01:00:00Z","value":null},
                    {"id":"b","key":"2018-01-01T02:00:00Z","value":null},
                    {"id":"c","key":"2018-01-01T03:00:00Z","value":null}
                ]}"#
                .to_string(),
            )
        } else {
            (200, r#"{"rows":[]}"#.to_string())
        }
    })
    .await;

    let range = KeyRange::new(JAN_1_2018, JAN_1_2018 + 2 * DAY_MS).unwrap();
    let config = HarvestConfig::new(range, Granularity::days(1)).with_page_size(10);
    let processor = Arc::new(CollectingProcessor::default());

    let summary = Harvester::new(config, Arc::new(fetcher(&url)), processor.clone())
        .unwrap()
        .run()
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.records, 3);
    assert_eq!(processor.records().len(), 3);
    // Day 1: first page + terminal page; day 2: one empty page
    assert_eq!(seen.lock().unwrap().len(), 3);
}
