mod common;

use common::{bars, result_with, strategy};
use proptest::prelude::*;
use robustlab_core::domain::{BacktestResult, BacktestSettings, Bar, StrategyDescriptor, StrategyParams};
use robustlab_core::engine::{BacktestEngine, EngineError, WindowComparison, WindowPerformance};
use robustlab_runner::walk_forward::{
    create_windows, run_walk_forward, WalkForwardPolicy, REASON_EXCESSIVE_DRAWDOWN, REASON_LOW_EFFICIENCY,
    REASON_LOW_STABILITY, REASON_NON_POSITIVE_COMBINED_PROFIT,
};
use robustlab_runner::{PipelineError, VerdictKind};

/// In-sample slices earn `is_net`, test slices `oos_net`, told apart by length.
struct SliceEngine {
    optimize_bars: usize,
    is_net: f64,
    oos_net: f64,
    comparison: Option<WindowComparison>,
}

impl BacktestEngine for SliceEngine {
    fn backtest(
        &self,
        bars: &[Bar],
        _strategy: &StrategyDescriptor,
        _params: &StrategyParams,
        _settings: &BacktestSettings,
    ) -> Result<BacktestResult, EngineError> {
        let net = if bars.len() == self.optimize_bars { self.is_net } else { self.oos_net };
        Ok(result_with(net, bars))
    }

    fn compare_windows(&self, windows: &[WindowPerformance]) -> WindowComparison {
        self.comparison
            .unwrap_or_else(|| robustlab_core::engine::default_window_comparison(windows))
    }
}

fn policy() -> WalkForwardPolicy {
    WalkForwardPolicy {
        optimize_bars: Some(300),
        test_bars: Some(100),
        ..WalkForwardPolicy::default()
    }
}

fn engine(oos_net: f64, comparison: Option<WindowComparison>) -> SliceEngine {
    SliceEngine {
        optimize_bars: 300,
        is_net: 6.0,
        oos_net,
        comparison,
    }
}

#[test]
fn windows_tile_the_series_and_trades_add_up() {
    let report = run_walk_forward(
        &engine(1.0, None),
        &bars(1000),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &policy(),
    )
    .unwrap();

    assert_eq!(report.windows.len(), 7);
    for pair in report.windows.windows(2) {
        assert_eq!(pair[1].spec.opt_start, pair[0].spec.opt_start + 100);
        assert_eq!(pair[0].spec.test_start, pair[0].spec.opt_end);
    }
    let window_trades: usize = report.windows.iter().map(|w| w.out_of_sample_result.total_trades).sum();
    assert_eq!(report.combined_out_of_sample.total_trades, window_trades);
    // 6% over 300 bars vs 1% over 100 bars.
    assert!((report.walk_forward_efficiency - 0.5).abs() < 1e-9);
    assert_eq!(report.verdict.verdict, VerdictKind::Pass);
}

#[test]
fn low_efficiency_alone_fails_with_its_reason() {
    let comparison = WindowComparison {
        walk_forward_efficiency: 0.30,
        parameter_stability: 80.0,
    };
    let report = run_walk_forward(
        &engine(1.0, Some(comparison)),
        &bars(1000),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &policy(),
    )
    .unwrap();

    assert!(report.combined_out_of_sample.net_profit_percent > 0.0);
    assert_eq!(report.verdict.verdict, VerdictKind::Fail);
    assert_eq!(report.verdict.fail_reasons, vec![REASON_LOW_EFFICIENCY.to_string()]);
}

#[test]
fn unstable_parameters_alone_fail_with_their_reason() {
    let comparison = WindowComparison {
        walk_forward_efficiency: 0.9,
        parameter_stability: 20.0,
    };
    let report = run_walk_forward(
        &engine(1.0, Some(comparison)),
        &bars(1000),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &policy(),
    )
    .unwrap();

    assert!(report.combined_out_of_sample.net_profit_percent > 0.0);
    assert_eq!(report.verdict.verdict, VerdictKind::Fail);
    assert_eq!(report.verdict.fail_reasons, vec![REASON_LOW_STABILITY.to_string()]);
}

#[test]
fn deep_combined_drawdown_alone_fails_with_its_reason() {
    let comparison = WindowComparison {
        walk_forward_efficiency: 0.9,
        parameter_stability: 80.0,
    };
    // Seven test windows losing 10% each compound to roughly -52%.
    let tolerant = WalkForwardPolicy {
        min_combined_net_profit_percent: -100.0,
        ..policy()
    };
    let report = run_walk_forward(
        &engine(-10.0, Some(comparison)),
        &bars(1000),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &tolerant,
    )
    .unwrap();

    assert!(report.combined_out_of_sample.max_drawdown_percent > 30.0);
    assert_eq!(report.verdict.verdict, VerdictKind::Fail);
    assert_eq!(report.verdict.fail_reasons, vec![REASON_EXCESSIVE_DRAWDOWN.to_string()]);
}

#[test]
fn losing_test_windows_fail_combined_profit() {
    let report = run_walk_forward(
        &engine(-0.5, None),
        &bars(1000),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &policy(),
    )
    .unwrap();
    assert!(report
        .verdict
        .fail_reasons
        .contains(&REASON_NON_POSITIVE_COMBINED_PROFIT.to_string()));
}

#[test]
fn series_shorter_than_one_window_is_fatal() {
    let err = run_walk_forward(
        &engine(1.0, None),
        &bars(350),
        Some(3600.0),
        &strategy(),
        &BacktestSettings::default(),
        &policy(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidWindowSizing(_)));
}

#[test]
fn stricter_efficiency_threshold_never_passes_more() {
    let bars = bars(1000);
    let loose = run_walk_forward(&engine(1.0, None), &bars, None, &strategy(), &BacktestSettings::default(), &policy()).unwrap();
    let strict_policy = WalkForwardPolicy {
        min_efficiency: 0.9,
        ..policy()
    };
    let strict =
        run_walk_forward(&engine(1.0, None), &bars, None, &strategy(), &BacktestSettings::default(), &strict_policy)
            .unwrap();
    assert_eq!(loose.verdict.verdict, VerdictKind::Pass);
    assert_eq!(strict.verdict.fail_reasons, vec![REASON_LOW_EFFICIENCY.to_string()]);
}

proptest! {
    #[test]
    fn windows_always_roll_by_one_test_length(total in 0usize..5_000, optimize in 1usize..800, test in 1usize..300) {
        match create_windows(total, optimize, test) {
            Ok(windows) => {
                prop_assert_eq!(windows.len(), (total - optimize) / test);
                for w in &windows {
                    prop_assert_eq!(w.opt_start, w.index * test);
                    prop_assert_eq!(w.opt_end - w.opt_start, optimize);
                    prop_assert_eq!(w.test_end - w.test_start, test);
                    prop_assert!(w.test_end <= total);
                }
            }
            Err(_) => prop_assert!(total < optimize + test),
        }
    }
}
