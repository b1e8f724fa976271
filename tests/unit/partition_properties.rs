//! Partition coverage over assorted ranges and granularities

use view_harvester::fetcher::KeyBounds;
use view_harvester::partition::{key_precision, shard_count};
use view_harvester::{
    partition, Granularity, KeyRange, PartitionError, DAY_MS, HOUR_MS, MINUTE_MS, SECOND_MS,
};

const JAN_1_2018: i64 = 1514764800000;

fn assert_tiles(range: KeyRange, granularity: Granularity) {
    let shards = partition(range, granularity).unwrap();
    assert_eq!(shards.len(), shard_count(range, granularity));

    assert_eq!(shards.first().unwrap().range().start(), range.start());
    assert_eq!(shards.last().unwrap().range().end(), range.end());

    for pair in shards.windows(2) {
        // Adjacent, no gap and no overlap
        assert_eq!(pair[0].range().end(), pair[1].range().start());
        assert!(pair[0].id() < pair[1].id());
    }
    for shard in &shards {
        assert!(shard.range().duration_ms() <= granularity.as_millis());
        assert!(shard.range().duration_ms() > 0);
        assert!(shard.cursor().is_none());
    }

    // The keys sent to the view must tile the range the same way
    let precision = key_precision(range, granularity).unwrap();
    let whole = KeyBounds::for_range(range, precision);
    let bounds: Vec<KeyBounds> = shards
        .iter()
        .map(|shard| KeyBounds::for_range(shard.range(), precision))
        .collect();
    assert_eq!(bounds.first().unwrap().start_key, whole.start_key);
    assert_eq!(bounds.last().unwrap().end_key, whole.end_key);
    for pair in bounds.windows(2) {
        assert!(pair[0].end_key < pair[1].start_key, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
}

#[test]
fn test_partition_tiles_the_range() {
    let cases = [
        (JAN_1_2018, JAN_1_2018 + 31 * DAY_MS, Granularity::days(1)),
        (JAN_1_2018, JAN_1_2018 + 31 * DAY_MS, Granularity::days(7)),
        (JAN_1_2018, JAN_1_2018 + DAY_MS, Granularity::hours(5)),
        (JAN_1_2018 + 17 * SECOND_MS, JAN_1_2018 + 3 * HOUR_MS + 5 * SECOND_MS, Granularity::minutes(15)),
        (JAN_1_2018, JAN_1_2018 + MINUTE_MS, Granularity::days(1)),
        (JAN_1_2018 + 6 * HOUR_MS, JAN_1_2018 + 3 * DAY_MS + 6 * HOUR_MS, Granularity::days(1)),
        (JAN_1_2018, JAN_1_2018 + 2 * DAY_MS + 90 * MINUTE_MS, Granularity::days(1)),
    ];
    for (start, end, granularity) in cases {
        assert_tiles(KeyRange::new(start, end).unwrap(), granularity);
    }
}

#[test]
fn test_last_shard_is_clamped() {
    let range = KeyRange::new(JAN_1_2018, JAN_1_2018 + 10 * DAY_MS).unwrap();
    let shards = partition(range, Granularity::days(7)).unwrap();

    assert_eq!(shards.len(), 2);
    assert_eq!(shards[1].range().duration_ms(), 3 * DAY_MS);
}

#[test]
fn test_invalid_granularity_rejected() {
    let range = KeyRange::new(JAN_1_2018, JAN_1_2018 + DAY_MS).unwrap();
    assert!(partition(range, Granularity::from_millis(0)).is_err());
    assert!(partition(range, Granularity::from_millis(-5)).is_err());
}

#[test]
fn test_millisecond_bounds_rejected() {
    let range = KeyRange::new(JAN_1_2018 + 17, JAN_1_2018 + 3 * HOUR_MS).unwrap();
    assert!(matches!(
        partition(range, Granularity::minutes(15)),
        Err(PartitionError::Unaligned { .. })
    ));
}
