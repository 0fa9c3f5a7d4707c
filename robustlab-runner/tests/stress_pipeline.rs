use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use robustlab_core::domain::{TradeDirection, TradeFilter};
use robustlab_core::engine::{reference_catalog, FinderConfig, RandomSearchFinder, ReferenceEngine, SMA_CROSS};
use robustlab_runner::audit::{summarize_files, AuditInput, AuditPolicy, AUDIT_LOG_FILE, AUDIT_MARKER};
use robustlab_runner::report::{SECTION_FEE_SLIPPAGE, SECTION_OOS, SECTION_WALK_FORWARD};
use robustlab_runner::walk_forward::WalkForwardPolicy;
use robustlab_runner::{PipelineError, StressConfig, StressPipeline, VerdictKind, REPORT_FILE};

/// Hourly bars: a slow uptrend with a few long swings on top.
fn write_dataset(dir: &Path, name: &str, n: usize) -> PathBuf {
    let rows: Vec<Value> = (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 0.02 * t + 6.0 * (t / 60.0).sin();
            json!([1_704_067_200 + i as i64 * 3600, close - 0.1, close + 0.4, close - 0.4, close, 500.0])
        })
        .collect();
    let path = dir.join(format!("{name}.json"));
    fs::write(&path, serde_json::to_string(&json!({"symbol": "TEST", "interval": "1h", "data": rows})).unwrap()).unwrap();
    path
}

fn config() -> StressConfig {
    StressConfig {
        seeds: vec![1, 2, 3],
        strategies: vec![SMA_CROSS.to_string()],
        filters: vec![TradeFilter::None],
        directions: vec![TradeDirection::Long],
        min_bars: 1000,
        walk_forward: WalkForwardPolicy {
            optimize_bars: Some(400),
            test_bars: Some(200),
            combination_budget: 8,
            ..WalkForwardPolicy::default()
        },
        search: FinderConfig {
            samples: 8,
            folds: 2,
            ..FinderConfig::default()
        },
        ..StressConfig::default()
    }
}

fn run(datasets: &[PathBuf], out: &Path, config: &StressConfig, force: bool) -> Result<Vec<robustlab_runner::TaskOutcome>, PipelineError> {
    let engine = ReferenceEngine;
    let finder = RandomSearchFinder::new(ReferenceEngine, config.search);
    let catalog = reference_catalog();
    StressPipeline::new(&engine, &finder, &catalog, config).run_batch(datasets, out, force)
}

#[test]
fn batch_writes_report_and_audit_log_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "SYN_1h", 1200);
    let out = dir.path().join("out");

    let outcomes = run(&[dataset], &out, &config(), false).unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(!outcome.reused);
    assert_eq!(outcome.report_path, out.join("SYN_1h").join(SMA_CROSS).join("none_long").join(REPORT_FILE));

    let report: Value = serde_json::from_str(&fs::read_to_string(&outcome.report_path).unwrap()).unwrap();
    for section in [SECTION_OOS, SECTION_WALK_FORWARD, SECTION_FEE_SLIPPAGE] {
        assert!(report[section]["verdict"].is_string(), "missing section {section}");
    }
    assert_eq!(report["inputs"]["barCount"], 1200);
    assert_eq!(report[SECTION_OOS]["trainBars"], 840);
    assert_eq!(report[SECTION_WALK_FORWARD]["windows"].as_array().unwrap().len(), 4);

    // Overall passes exactly when every section passes.
    let all_pass = [SECTION_OOS, SECTION_WALK_FORWARD, SECTION_FEE_SLIPPAGE]
        .iter()
        .all(|s| report[*s]["verdict"] == "PASS");
    assert_eq!(outcome.overall.verdict == VerdictKind::Pass, all_pass);
    for reason in &outcome.overall.fail_reasons {
        assert!(reason.starts_with(SECTION_OOS) || reason.starts_with(SECTION_WALK_FORWARD) || reason.starts_with(SECTION_FEE_SLIPPAGE));
    }

    // One audit line per seed for the OOS train search and one for the fee ensemble.
    let log_path = outcome.report_path.with_file_name(AUDIT_LOG_FILE);
    let log = fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.lines().filter(|l| l.starts_with(AUDIT_MARKER)).count(), 6);

    // Aggregated back, the cell holds one run per seed.
    let summary = summarize_files(&[AuditInput { path: log_path, kind: None }], &AuditPolicy::default()).unwrap();
    assert_eq!(summary.cells.len(), 1);
    assert_eq!(summary.cells[0].strategy_key, SMA_CROSS);
    assert_eq!(summary.cells[0].timeframe, "1h");
    assert_eq!(summary.cells[0].runs, config().seeds.len());
    assert_eq!(summary.global.other_phase_records, 3);
}

#[test]
fn existing_report_is_reused_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "SYN_1h", 1100);
    let out = dir.path().join("out");
    let config = config();

    let first = run(&[dataset.clone()], &out, &config, false).unwrap();
    let bytes = fs::read(&first[0].report_path).unwrap();

    let second = run(&[dataset.clone()], &out, &config, false).unwrap();
    assert!(second[0].reused);
    assert_eq!(second[0].overall, first[0].overall);
    assert_eq!(fs::read(&second[0].report_path).unwrap(), bytes);

    let forced = run(&[dataset], &out, &config, true).unwrap();
    assert!(!forced[0].reused);
    // Same inputs, same seeds: the recomputed report is byte-identical.
    assert_eq!(fs::read(&forced[0].report_path).unwrap(), bytes);
}

#[test]
fn every_unknown_strategy_is_reported_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "SYN_1h", 1100);
    let out = dir.path().join("out");
    let config = StressConfig {
        strategies: vec![SMA_CROSS.to_string(), "nope".to_string(), "missing".to_string()],
        ..config()
    };

    let err = run(&[dataset], &out, &config, false).unwrap_err();
    match err {
        PipelineError::UnknownStrategies(unknown) => {
            assert_eq!(unknown.0, vec!["nope".to_string(), "missing".to_string()])
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!out.exists());
}

#[test]
fn short_dataset_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "SHORT", 600);
    let err = run(&[dataset], &dir.path().join("out"), &config(), false).unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientBars { bars: 600, min_bars: 1000, .. }));
}

#[test]
fn max_bars_trims_to_most_recent() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "LONG", 1500);
    let config = StressConfig {
        max_bars: Some(1200),
        ..config()
    };
    let outcomes = run(&[dataset], &dir.path().join("out"), &config, false).unwrap();
    let report: Value = serde_json::from_str(&fs::read_to_string(&outcomes[0].report_path).unwrap()).unwrap();
    assert_eq!(report["inputs"]["barCount"], 1200);
    assert_eq!(report["inputs"]["firstBarTime"], 1_704_067_200 + 300 * 3600);
}
