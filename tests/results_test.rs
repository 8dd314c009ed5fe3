//! Result aggregation, statistics and the JSON export format.

use crabalign::results::{AxisStatistics, ResultAggregator, ResultRecord};
use crabalign::types::ToolOffsetResult;
use std::time::Duration;
use tempfile::tempdir;

fn result(tool: u32, cycle: u32, x: f64, y: f64) -> ToolOffsetResult {
    ToolOffsetResult {
        tool,
        cycle,
        mpp: 0.01234,
        x,
        y,
        elapsed: Duration::from_millis(8_500),
    }
}

fn three_cycles() -> ResultAggregator {
    let mut results = ResultAggregator::new();
    for (cycle, x) in [(1, 0.8), (2, 1.0), (3, 1.2)] {
        results.push(result(0, cycle, x, -0.5));
        results.push(result(1, cycle, 0.1, 0.2));
    }
    results
}

#[test]
fn test_statistics_over_cycles() {
    let stats = three_cycles().stats_for(0).unwrap();
    assert_eq!(stats.samples, 3);
    assert!((stats.x.mean - 1.0).abs() < 1e-9);
    assert!((stats.x.std_dev - 0.163).abs() < 0.001);
    assert!((stats.x.range - 0.4).abs() < 1e-9);
    assert_eq!(stats.x.max, 1.2);
    assert_eq!(stats.x.min, 0.8);
    assert_eq!(stats.y.std_dev, 0.0);
}

#[test]
fn test_axis_statistics_empty() {
    assert!(AxisStatistics::from_values(&[]).is_none());
}

#[test]
fn test_summary_per_tool() {
    let results = three_cycles();
    assert_eq!(results.tools(), vec![0, 1]);
    let summary = results.summary();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[1].tool, 1);
    assert!(results.stats_for(7).is_none());

    let report = results.report();
    assert!(report.contains("T0"));
    assert!(report.contains("T1"));
}

#[test]
fn test_record_rounding_and_field_names() {
    let record = ResultRecord::from(&result(2, 1, 1.23456, -0.98765));
    assert_eq!(record.x, 1.235);
    assert_eq!(record.y, -0.988);
    assert_eq!(record.mpp, 0.0123);

    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json["tool"], 2);
    assert_eq!(json["cycle"], 1);
    assert_eq!(json["X"], 1.235);
    assert_eq!(json["Y"], -0.988);
    assert!(json.get("x").is_none());
}

#[test]
fn test_export_import_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("results.json");

    let results = three_cycles();
    results.export(&path).unwrap();

    let loaded = ResultAggregator::import(&path).unwrap();
    assert_eq!(loaded.len(), 6);
    assert_eq!(loaded.records(), results.records());
    assert!(loaded.results().iter().all(|r| r.elapsed == Duration::ZERO));
}

#[test]
fn test_import_errors() {
    let dir = tempdir().unwrap();
    assert!(ResultAggregator::import(dir.path().join("missing.json")).is_err());

    let path = dir.path().join("garbage.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(ResultAggregator::import(&path).is_err());
}
