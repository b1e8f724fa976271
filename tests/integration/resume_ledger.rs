//! Partial re-harvest through the shard ledger

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use view_harvester::harvest::{HarvestConfig, HarvestStatus, Harvester, ShardStatus};
use view_harvester::resume::{ResumeError, ShardLedger};
use view_harvester::shutdown::ShutdownCoordinator;
use view_harvester::{Granularity, KeyRange, ShardId, DAY_MS};

use super::common::{daily_records, CollectingProcessor, MockView, JAN_1_2018};

const VIEW: &str = "mock://view";

fn config(days: i64) -> HarvestConfig {
    let range = KeyRange::new(JAN_1_2018, JAN_1_2018 + days * DAY_MS).unwrap();
    HarvestConfig::new(range, Granularity::days(1)).with_page_size(2)
}

fn shard(day: i64) -> ShardId {
    ShardId::new(JAN_1_2018 + day * DAY_MS)
}

#[tokio::test]
async fn test_resume_fetches_only_failed_shards() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let records = daily_records(JAN_1_2018, 5, 3);

    // First run: day 3 fails
    let view = Arc::new(MockView::new(records.clone()));
    view.fail_always(shard(3));
    let first = Arc::new(CollectingProcessor::default());
    let summary = Harvester::new(config(5), view.clone(), first.clone())
        .unwrap()
        .run()
        .await;
    assert_eq!(summary.status, HarvestStatus::PartiallyFailed);

    let mut ledger = ShardLedger::new(VIEW, &config(5));
    ledger.record_summary(&summary);
    ledger.save(&path).unwrap();

    // Second run against a healthy view
    let ledger = ShardLedger::load(&path).unwrap();
    ledger.ensure_scope(VIEW, &config(5)).unwrap();
    assert_eq!(ledger.pending(), 1);

    let view = Arc::new(MockView::new(records));
    let second = Arc::new(CollectingProcessor::default());
    let harvester = Harvester::new(config(5), view.clone(), second.clone())
        .unwrap()
        .resume_from(&ledger);
    assert_eq!(harvester.shards().len(), 1);

    let summary = harvester.run().await;
    assert!(summary.is_success());
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.succeeded, 1);

    let touched = view.touched_shards();
    assert_eq!(touched.len(), 1);
    assert!(touched.contains(&shard(3)));

    assert_eq!(first.records().len() + second.records().len(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_shard_resumes_from_cursor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let records = daily_records(JAN_1_2018, 1, 5);

    let shutdown = ShutdownCoordinator::shared();
    let view = Arc::new(MockView::new(records.clone()).with_latency(Duration::from_millis(10)));
    view.cancel_after(2, shutdown.clone());
    let first = Arc::new(CollectingProcessor::default());
    let summary = Harvester::new(config(1), view, first.clone())
        .unwrap()
        .with_shutdown(shutdown)
        .run()
        .await;
    assert_eq!(summary.status, HarvestStatus::Cancelled);
    assert_eq!(summary.outcome(shard(0)).unwrap().status, ShardStatus::Cancelled);
    assert_eq!(first.records().len(), 4);

    let mut ledger = ShardLedger::new(VIEW, &config(1));
    ledger.record_summary(&summary);
    ledger.save(&path).unwrap();
    let ledger = ShardLedger::load(&path).unwrap();
    let cursor = ledger.entry(shard(0)).unwrap().cursor.clone().unwrap();
    assert_eq!(cursor.id, "doc-000-003");

    let view = Arc::new(MockView::new(records));
    let second = Arc::new(CollectingProcessor::default());
    let summary = Harvester::new(config(1), view.clone(), second.clone())
        .unwrap()
        .resume_from(&ledger)
        .run()
        .await;

    assert!(summary.is_success());
    assert_eq!(view.cursors(shard(0))[0].as_ref(), Some(&cursor));
    let ids: Vec<String> = second.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["doc-000-004"]);
}

#[tokio::test]
async fn test_ledger_scope_mismatch_is_rejected() {
    let ledger = ShardLedger::new(VIEW, &config(5));

    assert!(ledger.ensure_scope(VIEW, &config(5)).is_ok());
    assert!(matches!(
        ledger.ensure_scope(VIEW, &config(6)),
        Err(ResumeError::ScopeMismatch(_))
    ));
    assert!(matches!(
        ledger.ensure_scope("http://other/db/_design/d/_view/v", &config(5)),
        Err(ResumeError::ScopeMismatch(_))
    ));
}
