mod common;

use common::{assert_near, bars, strategy, ScriptedSearch};
use robustlab_core::domain::BacktestSettings;
use robustlab_runner::audit::{CellAudit, MemorySink};
use robustlab_runner::fee_slippage::{
    run_fee_slippage, FeeSlippagePolicy, FeeSlippageReport, REASON_EXCESSIVE_MEDIAN_DRAWDOWN,
    REASON_INSUFFICIENT_RESULTS, REASON_NON_POSITIVE_MEDIAN_PROFIT,
};
use robustlab_runner::VerdictKind;

fn run(search: &ScriptedSearch, median_close: Option<f64>, policy: &FeeSlippagePolicy) -> FeeSlippageReport {
    let bars = bars(1000);
    let mut sink = MemorySink::default();
    let mut audit = CellAudit::new(&mut sink, "stub", "1h");
    run_fee_slippage(
        search,
        &bars,
        median_close,
        &strategy(),
        &[1, 2, 3, 4],
        &BacktestSettings::default(),
        policy,
        &mut audit,
    )
    .unwrap()
}

#[test]
fn expensive_instrument_is_floored_to_min_slippage() {
    let search = ScriptedSearch::new(&[(1, Some(2.0)), (2, Some(3.0)), (3, Some(1.0)), (4, Some(4.0))]);
    let report = run(&search, Some(10_000.0), &FeeSlippagePolicy::default());

    assert!((report.slippage.raw_slippage_bps - 0.01).abs() < 1e-12);
    assert_eq!(report.slippage.applied_slippage_bps, 1.0);
    assert!(report.slippage.floored);
    assert_eq!(report.costs.slippage_bps, 1.0);
    // Every search ran on the full series under the derived cost.
    assert!(search.seen().iter().all(|&(_, n, bps)| n == 1000 && bps == 1.0));
    assert_eq!(report.result_count, 4);
    assert_near(report.median_net_profit_percent, 2.5);
    assert_eq!(report.verdict.verdict, VerdictKind::Pass);
}

#[test]
fn cheap_instrument_keeps_raw_slippage() {
    let search = ScriptedSearch::new(&[(1, Some(2.0)), (2, Some(3.0)), (3, Some(1.0))]);
    let report = run(&search, Some(20.0), &FeeSlippagePolicy::default());
    assert!((report.slippage.applied_slippage_bps - 5.0).abs() < 1e-12);
    assert!(!report.slippage.floored);
}

#[test]
fn too_few_results_fail() {
    let search = ScriptedSearch::new(&[(1, Some(2.0)), (2, Some(3.0))]);
    let report = run(&search, Some(50.0), &FeeSlippagePolicy::default());
    assert_eq!(report.result_count, 2);
    assert_eq!(report.verdict.fail_reasons, vec![REASON_INSUFFICIENT_RESULTS.to_string()]);
}

#[test]
fn no_results_fail_every_check() {
    let search = ScriptedSearch::new(&[]);
    let report = run(&search, None, &FeeSlippagePolicy::default());
    assert!(report.median_net_profit_percent.is_none());
    assert_eq!(
        report.verdict.fail_reasons,
        vec![
            REASON_INSUFFICIENT_RESULTS.to_string(),
            REASON_NON_POSITIVE_MEDIAN_PROFIT.to_string(),
            REASON_EXCESSIVE_MEDIAN_DRAWDOWN.to_string(),
        ]
    );
}

#[test]
fn stricter_thresholds_never_pass_more() {
    let search = ScriptedSearch::new(&[(1, Some(2.0)), (2, Some(3.0)), (3, Some(1.0)), (4, Some(4.0))]);
    let base = FeeSlippagePolicy::default();
    assert_eq!(run(&search, Some(100.0), &base).verdict.verdict, VerdictKind::Pass);

    let strict_profit = FeeSlippagePolicy {
        min_median_net_profit_percent: 10.0,
        ..base
    };
    let strict_count = FeeSlippagePolicy {
        min_seed_results: 5,
        ..base
    };
    assert_eq!(run(&search, Some(100.0), &strict_profit).verdict.verdict, VerdictKind::Fail);
    assert_eq!(run(&search, Some(100.0), &strict_count).verdict.verdict, VerdictKind::Fail);
}
