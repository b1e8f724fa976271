//! End-to-end harvest scenarios against the in-memory view

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use view_harvester::fetcher::FetchError;
use view_harvester::harvest::{
    HarvestConfig, HarvestError, HarvestStatus, Harvester, RetryPolicy, ShardStatus,
};
use view_harvester::shutdown::ShutdownCoordinator;
use view_harvester::{
    partition, Cursor, Granularity, KeyRange, PartitionError, Record, ShardId, DAY_MS, HOUR_MS,
    MINUTE_MS,
};

use super::common::{
    daily_records, record_at, CollectingProcessor, MockView, RecordingReporter, Seen, FEB_1_2018,
    JAN_1_2018,
};

fn days(n: i64) -> KeyRange {
    KeyRange::new(JAN_1_2018, JAN_1_2018 + n * DAY_MS).unwrap()
}

fn shard(day: i64) -> ShardId {
    ShardId::new(JAN_1_2018 + day * DAY_MS)
}

#[tokio::test]
async fn test_january_by_day_harvests_31_shards() {
    let range = KeyRange::new(JAN_1_2018, FEB_1_2018).unwrap();
    assert_eq!(partition(range, Granularity::days(1)).unwrap().len(), 31);

    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 31, 3)));
    let processor = Arc::new(CollectingProcessor::default());
    let config = HarvestConfig::new(range, Granularity::days(1)).with_page_size(10);

    let summary = Harvester::new(config, view.clone(), processor.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(summary.status, HarvestStatus::Completed);
    assert_eq!(summary.succeeded, 31);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.records, 93);
    assert_eq!(processor.records().len(), 93);
    assert_eq!(summary.outcomes.len(), 31);
}

#[tokio::test]
async fn test_page_size_two_over_five_records() {
    // Pages of 2, 2, 1, then an empty page without continuation
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 1, 5)));
    let processor = Arc::new(CollectingProcessor::default());
    let reporter = Arc::new(RecordingReporter::default());
    let config = HarvestConfig::new(days(1), Granularity::days(1)).with_page_size(2);

    let summary = Harvester::new(config, view.clone(), processor.clone())
        .unwrap()
        .with_reporter(reporter.clone())
        .run()
        .await;

    assert!(summary.is_success());
    assert_eq!(view.requests(), 4);

    let pages: Vec<usize> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Seen::Page { records, .. } => Some(records),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![2, 2, 1]);

    let cursors = view.cursors(shard(0));
    let ids: Vec<Option<String>> = cursors
        .iter()
        .map(|c| c.as_ref().map(|c| c.id.clone()))
        .collect();
    assert_eq!(
        ids,
        vec![
            None,
            Some("doc-000-001".to_string()),
            Some("doc-000-003".to_string()),
            Some("doc-000-004".to_string()),
        ]
    );

    let report = summary.outcome(shard(0)).unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.records, 5);
    assert_eq!(processor.records().len(), 5);
}

#[tokio::test]
async fn test_records_sharing_a_key_are_not_duplicated() {
    let ts = JAN_1_2018 + 3_600_000;
    let records = vec![
        record_at(ts, "a"),
        record_at(ts, "b"),
        record_at(ts, "c"),
        record_at(ts, "d"),
        record_at(ts, "e"),
    ];
    let view = Arc::new(MockView::new(records));
    let processor = Arc::new(CollectingProcessor::default());
    let config = HarvestConfig::new(days(1), Granularity::days(1)).with_page_size(2);

    let summary = Harvester::new(config, view, processor.clone())
        .unwrap()
        .run()
        .await;

    assert!(summary.is_success());
    let ids: Vec<String> = processor.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_cursor_sequence_strictly_increases_per_shard() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 5, 7)));
    let processor = Arc::new(CollectingProcessor::default());
    let config = HarvestConfig::new(days(5), Granularity::days(1))
        .with_page_size(3)
        .with_concurrency(2);

    let summary = Harvester::new(config, view.clone(), processor)
        .unwrap()
        .run()
        .await;
    assert!(summary.is_success());

    for day in 0..5 {
        let cursors: Vec<Cursor> = view.cursors(shard(day)).into_iter().flatten().collect();
        assert!(!cursors.is_empty());
        for pair in cursors.windows(2) {
            assert!(pair[0] < pair[1], "cursor did not advance: {pair:?}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_two_transient_failures() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 1, 2)));
    view.fail_next(
        shard(0),
        vec![
            FetchError::Transient("HTTP 503".to_string()),
            FetchError::Transient("connection reset".to_string()),
        ],
    );
    let processor = Arc::new(CollectingProcessor::default());
    let reporter = Arc::new(RecordingReporter::default());
    let config = HarvestConfig::new(days(1), Granularity::days(1))
        .with_retry(RetryPolicy::fixed(5_000, 3));

    let started = tokio::time::Instant::now();
    let summary = Harvester::new(config, view, processor.clone())
        .unwrap()
        .with_reporter(reporter.clone())
        .run()
        .await;
    let elapsed = started.elapsed();

    assert!(summary.is_success());
    assert_eq!(summary.retries, 2);
    assert!(elapsed >= Duration::from_millis(10_000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(11_000), "elapsed {elapsed:?}");

    let retries = reporter.retries();
    assert_eq!(
        retries,
        vec![
            Seen::Retry {
                shard: shard(0),
                retry: 1,
                delay: Duration::from_millis(5_000)
            },
            Seen::Retry {
                shard: shard(0),
                retry: 2,
                delay: Duration::from_millis(5_000)
            },
        ]
    );
    assert_eq!(processor.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fail_only_that_shard() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 3, 2)));
    view.fail_next(
        shard(1),
        (0..3)
            .map(|_| FetchError::Transient("HTTP 500".to_string()))
            .collect(),
    );
    let processor = Arc::new(CollectingProcessor::default());
    let config = HarvestConfig::new(days(3), Granularity::days(1))
        .with_retry(RetryPolicy::fixed(1_000, 3));

    let summary = Harvester::new(config, view, processor)
        .unwrap()
        .run()
        .await;

    assert_eq!(summary.status, HarvestStatus::PartiallyFailed);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].id, shard(1));
    assert!(summary.failed[0].error.contains("gave up after 3 attempts"));
    assert!(summary.failed[0].error.contains("HTTP 500"));
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_delays() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 1, 1)));
    view.fail_next(
        shard(0),
        (0..3)
            .map(|_| FetchError::Transient("timeout".to_string()))
            .collect(),
    );
    let reporter = Arc::new(RecordingReporter::default());
    let config = HarvestConfig::new(days(1), Granularity::days(1))
        .with_retry(RetryPolicy::fixed(1_000, 5).exponential(3_000));

    let summary = Harvester::new(config, view, Arc::new(CollectingProcessor::default()))
        .unwrap()
        .with_reporter(reporter.clone())
        .run()
        .await;
    assert!(summary.is_success());

    let delays: Vec<Duration> = reporter
        .retries()
        .into_iter()
        .filter_map(|e| match e {
            Seen::Retry { delay, .. } => Some(delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
            Duration::from_millis(3_000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_three_over_ten() {
    let view = Arc::new(
        MockView::new(daily_records(JAN_1_2018, 10, 4)).with_latency(Duration::from_millis(50)),
    );
    let reporter = Arc::new(RecordingReporter::default());
    let config = HarvestConfig::new(days(10), Granularity::days(1))
        .with_page_size(2)
        .with_concurrency(3);

    let summary = Harvester::new(config, view.clone(), Arc::new(CollectingProcessor::default()))
        .unwrap()
        .with_reporter(reporter.clone())
        .run()
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.succeeded, 10);
    assert!(view.peak_active() <= 3, "peak {}", view.peak_active());
    assert_eq!(view.peak_active(), 3);

    let events = reporter.events();
    assert!(events.contains(&Seen::Started {
        shards: 10,
        skipped: 0,
        workers: 3
    }));
    for event in &events {
        if let Seen::Admitted { active, .. } = event {
            assert!(*active <= 3);
        }
    }
}

#[tokio::test]
async fn test_fatal_failure_is_isolated() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 10, 3)));
    view.fail_always(shard(4));
    let processor = Arc::new(CollectingProcessor::default());
    let config = HarvestConfig::new(days(10), Granularity::days(1)).with_concurrency(3);

    let summary = Harvester::new(config, view.clone(), processor.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(summary.status, HarvestStatus::PartiallyFailed);
    assert_eq!(summary.succeeded, 9);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].id, shard(4));
    assert!(summary.failed[0].error.contains("HTTP 400"));
    assert_eq!(processor.records().len(), 27);
    // Fatal errors are never retried
    assert_eq!(view.cursors(shard(4)).len(), 1);
    assert_eq!(summary.retries, 0);
}

#[tokio::test]
async fn test_processor_error_fails_shard() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 3, 2)));
    let processor = Arc::new(CollectingProcessor::default());
    processor.reject("doc-002-000");
    let config = HarvestConfig::new(days(3), Granularity::days(1));

    let summary = Harvester::new(config, view, processor)
        .unwrap()
        .run()
        .await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].id, shard(2));
    assert!(summary.failed[0].error.contains("refused doc-002-000"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_new_admissions() {
    let shutdown = ShutdownCoordinator::shared();
    let view = Arc::new(
        MockView::new(daily_records(JAN_1_2018, 10, 4)).with_latency(Duration::from_millis(100)),
    );
    view.cancel_after(3, shutdown.clone());
    let config = HarvestConfig::new(days(10), Granularity::days(1))
        .with_page_size(2)
        .with_concurrency(2);

    let summary = Harvester::new(config, view.clone(), Arc::new(CollectingProcessor::default()))
        .unwrap()
        .with_shutdown(shutdown.clone())
        .run()
        .await;

    assert_eq!(summary.status, HarvestStatus::Cancelled);
    assert!(view.started_after_cancel().is_empty());
    assert!(summary.not_started > 0);
    assert_eq!(
        summary.succeeded + summary.failed.len() + summary.cancelled + summary.not_started,
        10
    );
    assert!(view.touched_shards().len() <= 2);
    for report in &summary.outcomes {
        if report.status == ShardStatus::NotStarted {
            assert!(!view.touched_shards().contains(&report.id));
        }
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 4, 1)));
    let reporter = Arc::new(RecordingReporter::default());
    let config = HarvestConfig::new(days(4), Granularity::days(1));

    let summary = Harvester::new(config, view.clone(), Arc::new(CollectingProcessor::default()))
        .unwrap()
        .with_shutdown(shutdown)
        .with_reporter(reporter.clone())
        .run()
        .await;

    assert_eq!(summary.status, HarvestStatus::Cancelled);
    assert_eq!(summary.not_started, 4);
    assert_eq!(view.requests(), 0);
    let completed = reporter
        .events()
        .into_iter()
        .filter(|e| *e == Seen::Completed)
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_harvest_is_idempotent() {
    let records = daily_records(JAN_1_2018, 6, 5);
    let config = HarvestConfig::new(days(6), Granularity::days(1))
        .with_page_size(2)
        .with_concurrency(4);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let view = Arc::new(MockView::new(records.clone()));
        let summary = Harvester::new(config.clone(), view, Arc::new(CollectingProcessor::default()))
            .unwrap()
            .run()
            .await;
        let pages: HashMap<ShardId, u64> = summary
            .outcomes
            .iter()
            .map(|report| (report.id, report.pages))
            .collect();
        runs.push((summary.records, pages));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].0, 30);
}

#[tokio::test]
async fn test_empty_shards_succeed_with_one_request() {
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018 + 2 * DAY_MS, 1, 3)));
    let config = HarvestConfig::new(days(4), Granularity::days(1));

    let summary = Harvester::new(config, view.clone(), Arc::new(CollectingProcessor::default()))
        .unwrap()
        .run()
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.records, 3);
    for day in [0, 1, 3] {
        assert_eq!(view.cursors(shard(day)), vec![None]);
        assert_eq!(summary.outcome(shard(day)).unwrap().pages, 0);
    }
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_request() {
    let view = Arc::new(MockView::new(Vec::new()));

    let result = Harvester::new(
        HarvestConfig::new(days(1), Granularity::from_millis(0)),
        view.clone(),
        Arc::new(CollectingProcessor::default()),
    );
    assert!(result.is_err());

    let result = Harvester::new(
        HarvestConfig::new(days(1), Granularity::days(1)).with_concurrency(0),
        view.clone(),
        Arc::new(CollectingProcessor::default()),
    );
    assert!(result.is_err());
    assert_eq!(view.requests(), 0);
}

async fn harvest_ids(records: Vec<Record>, range: KeyRange, granularity: Granularity) -> Vec<String> {
    let config = HarvestConfig::new(range, granularity).with_page_size(2);
    let view = Arc::new(MockView::new(records).with_precision(config.key_precision().unwrap()));
    let processor = Arc::new(CollectingProcessor::default());

    let summary = Harvester::new(config, view, processor.clone())
        .unwrap()
        .run()
        .await;
    assert_eq!(summary.status, HarvestStatus::Completed);
    assert_eq!(summary.records as usize, processor.records().len());

    let mut ids: Vec<String> = processor.records().into_iter().map(|r| r.id).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_offset_range_delivers_each_record_once() {
    // Days cut at 06:00 share calendar dates with their neighbours
    let records = vec![
        record_at(JAN_1_2018 + 2 * HOUR_MS, "before-range"),
        record_at(JAN_1_2018 + 6 * HOUR_MS, "jan1-06h"),
        record_at(JAN_1_2018 + 23 * HOUR_MS, "jan1-23h"),
        record_at(JAN_1_2018 + 30 * HOUR_MS, "jan2-06h"),
        record_at(JAN_1_2018 + 34 * HOUR_MS, "jan2-10h"),
        record_at(JAN_1_2018 + 53 * HOUR_MS, "jan3-05h"),
        record_at(JAN_1_2018 + 54 * HOUR_MS, "after-range"),
    ];
    let range = KeyRange::new(JAN_1_2018 + 6 * HOUR_MS, JAN_1_2018 + 54 * HOUR_MS).unwrap();

    let ids = harvest_ids(records, range, Granularity::days(1)).await;

    assert_eq!(ids, vec!["jan1-06h", "jan1-23h", "jan2-06h", "jan2-10h", "jan3-05h"]);
}

#[tokio::test]
async fn test_clipped_final_shard_stays_inside_range() {
    let records = vec![
        record_at(JAN_1_2018 + 12 * HOUR_MS, "jan1-12h"),
        record_at(JAN_1_2018 + 27 * HOUR_MS, "jan2-03h"),
        record_at(JAN_1_2018 + 29 * HOUR_MS + 59 * MINUTE_MS, "jan2-05h59"),
        record_at(JAN_1_2018 + 30 * HOUR_MS, "jan2-06h"),
        record_at(JAN_1_2018 + 40 * HOUR_MS, "jan2-16h"),
    ];
    let range = KeyRange::new(JAN_1_2018, JAN_1_2018 + 30 * HOUR_MS).unwrap();

    let ids = harvest_ids(records, range, Granularity::days(1)).await;

    assert_eq!(ids, vec!["jan1-12h", "jan2-03h", "jan2-05h59"]);
}

#[test]
fn test_sub_second_range_is_rejected_before_any_request() {
    let range = KeyRange::new(JAN_1_2018 + 250, JAN_1_2018 + DAY_MS).unwrap();
    let view = Arc::new(MockView::new(daily_records(JAN_1_2018, 1, 3)));

    let result = Harvester::new(
        HarvestConfig::new(range, Granularity::days(1)),
        view.clone(),
        Arc::new(CollectingProcessor::default()),
    );

    assert!(matches!(
        result,
        Err(HarvestError::Partition(PartitionError::Unaligned { .. }))
    ));
    assert_eq!(view.requests(), 0);
}
