//! Output writers used as harvest record processors

use std::sync::Arc;
use tempfile::TempDir;
use view_harvester::harvest::RecordProcessor;
use view_harvester::output::{FileWriter, OutputFormat, RecordWriter, SharedWriter};
use view_harvester::Record;

fn page(ids: &[&str]) -> Vec<Record> {
    ids.iter()
        .map(|id| Record {
            id: id.to_string(),
            key: "2018-01-05T00:00:00Z".to_string(),
            value: serde_json::json!([1, 2]),
            doc: None,
        })
        .collect()
}

#[test]
fn test_shared_csv_writer_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let shared = Arc::new(SharedWriter::new(
        FileWriter::create(&path, OutputFormat::Csv).unwrap(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for p in 0..10 {
                    let a = format!("t{t}-p{p}-a");
                    let b = format!("t{t}-p{p}-b");
                    shared.process(&page(&[&a, &b])).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(shared.close().unwrap(), 80);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 80);
    // Pages are written whole
    for pair in rows.chunks(2) {
        assert_eq!(pair[0][0].trim_end_matches('a'), pair[1][0].trim_end_matches('b'));
    }
}

#[test]
fn test_jsonl_append_keeps_earlier_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.jsonl");

    let mut first = FileWriter::create(&path, OutputFormat::JsonLines).unwrap();
    first.write_records(&page(&["a", "b"])).unwrap();
    first.close().unwrap();

    let mut second = FileWriter::append(&path, OutputFormat::JsonLines).unwrap();
    second.write_records(&page(&["c"])).unwrap();
    assert_eq!(second.records_written(), 1);
    second.close().unwrap();

    let ids: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Record>(line).unwrap().id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}
