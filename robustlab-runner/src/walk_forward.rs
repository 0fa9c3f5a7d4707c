//! Walk-forward validation: rolling optimize/test windows and OOS stitching.
//!
//! Windows roll forward by one test length:
//! - window i optimizes on `[i*W_test, i*W_test + W_opt)`
//! - and tests on the following `W_test` bars
//!
//! A trailing window that would run past the data is dropped. Parameters are
//! re-optimized per window from ranges derived around the strategy defaults,
//! then replayed unchanged on the test slice. The out-of-sample slices are
//! stitched into one combined result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use robustlab_core::domain::{
    BacktestResult, BacktestSettings, Bar, ResultSummary, StrategyDescriptor, StrategyParams,
};
use robustlab_core::engine::ranges::steps_per_param;
use robustlab_core::engine::{derive_ranges, BacktestEngine, ParamRange, WindowPerformance};

use crate::runner::PipelineError;
use crate::verdict::{Checks, Verdict};

pub const REASON_NON_POSITIVE_COMBINED_PROFIT: &str = "non_positive_combined_oos_net_profit";
pub const REASON_LOW_EFFICIENCY: &str = "low_walk_forward_efficiency";
pub const REASON_LOW_STABILITY: &str = "low_parameter_stability";
pub const REASON_EXCESSIVE_DRAWDOWN: &str = "excessive_combined_oos_drawdown";

/// Average month length used to turn month-based window sizes into bars.
const SECONDS_PER_MONTH: f64 = 30.4375 * 86_400.0;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WalkForwardPolicy {
    /// Explicit optimize window in bars; overrides `optimize_months`.
    pub optimize_bars: Option<usize>,
    /// Explicit test window in bars; overrides `test_months`.
    pub test_bars: Option<usize>,
    pub optimize_months: f64,
    pub test_months: f64,
    /// Target grid size per window across all tuned parameters.
    pub combination_budget: usize,
    pub min_combined_net_profit_percent: f64,
    pub min_efficiency: f64,
    pub min_parameter_stability: f64,
    pub max_combined_drawdown_percent: f64,
    /// Parameter moves at or below this size are not counted as changes.
    pub change_epsilon: f64,
}

impl Default for WalkForwardPolicy {
    fn default() -> Self {
        Self {
            optimize_bars: None,
            test_bars: None,
            optimize_months: 3.0,
            test_months: 1.0,
            combination_budget: 64,
            min_combined_net_profit_percent: 0.0,
            min_efficiency: 0.45,
            min_parameter_stability: 40.0,
            max_combined_drawdown_percent: 30.0,
            change_epsilon: 1e-9,
        }
    }
}

// ─── Window layout ───────────────────────────────────────────────────

/// Bar index ranges of one window; ends are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSpec {
    pub index: usize,
    pub opt_start: usize,
    pub opt_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Optimize/test lengths in bars, from explicit sizes or months over the bar spacing.
pub fn resolve_window_sizes(
    policy: &WalkForwardPolicy,
    bar_spacing_seconds: Option<f64>,
) -> Result<(usize, usize), PipelineError> {
    let months_to_bars = |months: f64| -> Result<usize, PipelineError> {
        match bar_spacing_seconds {
            Some(spacing) if spacing > 0.0 && months.is_finite() && months > 0.0 => {
                Ok((months * SECONDS_PER_MONTH / spacing).round() as usize)
            }
            _ => Err(PipelineError::InvalidWindowSizing(format!(
                "cannot convert {months} months to bars without a positive bar spacing"
            ))),
        }
    };
    let optimize = match policy.optimize_bars {
        Some(bars) => bars,
        None => months_to_bars(policy.optimize_months)?,
    };
    let test = match policy.test_bars {
        Some(bars) => bars,
        None => months_to_bars(policy.test_months)?,
    };
    Ok((optimize, test))
}

/// Tile `[0, total)` into rolling windows; the trailing partial window is dropped.
pub fn create_windows(total: usize, optimize: usize, test: usize) -> Result<Vec<WindowSpec>, PipelineError> {
    if optimize == 0 || test == 0 {
        return Err(PipelineError::InvalidWindowSizing(format!(
            "window sizes must be positive (optimize {optimize}, test {test})"
        )));
    }

    let mut windows = Vec::new();
    for index in 0.. {
        let opt_start = index * test;
        let opt_end = opt_start + optimize;
        let test_end = opt_end + test;
        if test_end > total {
            break;
        }
        windows.push(WindowSpec {
            index,
            opt_start,
            opt_end,
            test_start: opt_end,
            test_end,
        });
    }

    if windows.is_empty() {
        return Err(PipelineError::InvalidWindowSizing(format!(
            "no complete window fits in {total} bars (optimize {optimize} + test {test})"
        )));
    }
    Ok(windows)
}

// ─── Result types ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardWindow {
    #[serde(flatten)]
    pub spec: WindowSpec,
    pub optimized_params: StrategyParams,
    pub in_sample_result: ResultSummary,
    pub out_of_sample_result: ResultSummary,
}

/// How much the optimized parameters move between consecutive windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDrift {
    pub tuned_params: Vec<String>,
    pub total_changes: usize,
    pub average_changed_params_per_window: f64,
    pub changed_param_rate_per_window: f64,
    pub per_param_changes: BTreeMap<String, usize>,
    pub per_param_distinct_values: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardReport {
    pub optimize_bars: usize,
    pub test_bars: usize,
    pub combination_budget: usize,
    pub steps_per_param: usize,
    pub ranges: Vec<ParamRange>,
    pub windows: Vec<WalkForwardWindow>,
    pub combined_out_of_sample: ResultSummary,
    pub walk_forward_efficiency: f64,
    pub parameter_stability: f64,
    pub parameter_drift: ParameterDrift,
    #[serde(flatten)]
    pub verdict: Verdict,
}

// ─── Drift ───────────────────────────────────────────────────────────

pub fn parameter_drift(params: &[&StrategyParams], tuned: &[String], epsilon: f64) -> ParameterDrift {
    let mut per_param_changes: BTreeMap<String, usize> = tuned.iter().map(|n| (n.clone(), 0)).collect();
    let mut total_changes = 0;

    for pair in params.windows(2) {
        for name in tuned {
            let (Some(before), Some(after)) = (pair[0].get(name), pair[1].get(name)) else {
                continue;
            };
            if (after - before).abs() > epsilon {
                total_changes += 1;
                *per_param_changes.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }

    let per_param_distinct_values = tuned
        .iter()
        .map(|name| {
            let mut distinct: Vec<f64> = Vec::new();
            for value in params.iter().filter_map(|p| p.get(name)) {
                if !distinct.iter().any(|d| (d - value).abs() <= epsilon) {
                    distinct.push(value);
                }
            }
            (name.clone(), distinct.len())
        })
        .collect();

    let transitions = params.len().saturating_sub(1);
    let average = if transitions == 0 {
        0.0
    } else {
        total_changes as f64 / transitions as f64
    };
    let rate = if tuned.is_empty() { 0.0 } else { average / tuned.len() as f64 };

    ParameterDrift {
        tuned_params: tuned.to_vec(),
        total_changes,
        average_changed_params_per_window: average,
        changed_param_rate_per_window: rate,
        per_param_changes,
        per_param_distinct_values,
    }
}

// ─── Orchestration ───────────────────────────────────────────────────

pub fn run_walk_forward(
    engine: &dyn BacktestEngine,
    bars: &[Bar],
    bar_spacing_seconds: Option<f64>,
    strategy: &StrategyDescriptor,
    settings: &BacktestSettings,
    policy: &WalkForwardPolicy,
) -> Result<WalkForwardReport, PipelineError> {
    let (optimize_bars, test_bars) = resolve_window_sizes(policy, bar_spacing_seconds)?;
    let specs = create_windows(bars.len(), optimize_bars, test_bars)?;

    let tuned = strategy.tunable_params();
    let steps = steps_per_param(policy.combination_budget, tuned.len());
    let ranges = derive_ranges(strategy, policy.combination_budget);
    info!(
        strategy = %strategy.key,
        windows = specs.len(),
        optimize_bars,
        test_bars,
        steps,
        "walk-forward start"
    );

    let mut windows = Vec::with_capacity(specs.len());
    let mut oos_results: Vec<BacktestResult> = Vec::with_capacity(specs.len());
    let mut performance = Vec::with_capacity(specs.len());

    for spec in specs {
        let optimization = engine.optimize(&bars[spec.opt_start..spec.opt_end], strategy, &ranges, settings)?;
        let oos = engine.backtest(
            &bars[spec.test_start..spec.test_end],
            strategy,
            &optimization.params,
            settings,
        )?;
        info!(
            strategy = %strategy.key,
            window = spec.index,
            is_net = optimization.in_sample.net_profit_percent,
            oos_net = oos.net_profit_percent,
            "walk-forward window"
        );

        performance.push(WindowPerformance {
            in_sample_bars: spec.opt_end - spec.opt_start,
            out_of_sample_bars: spec.test_end - spec.test_start,
            in_sample_net_profit_percent: optimization.in_sample.net_profit_percent,
            out_of_sample_net_profit_percent: oos.net_profit_percent,
        });
        windows.push(WalkForwardWindow {
            spec,
            optimized_params: optimization.params,
            in_sample_result: optimization.in_sample.summary(),
            out_of_sample_result: oos.summary(),
        });
        oos_results.push(oos);
    }

    let combined = BacktestResult::stitch(&oos_results, settings.periods_per_year).summary();
    let comparison = engine.compare_windows(&performance);
    let window_params: Vec<&StrategyParams> = windows.iter().map(|w| &w.optimized_params).collect();
    let parameter_drift = parameter_drift(&window_params, &tuned, policy.change_epsilon);

    let verdict = Checks::default()
        .require(
            combined.net_profit_percent > policy.min_combined_net_profit_percent,
            REASON_NON_POSITIVE_COMBINED_PROFIT,
        )
        .require(comparison.walk_forward_efficiency >= policy.min_efficiency, REASON_LOW_EFFICIENCY)
        .require(comparison.parameter_stability >= policy.min_parameter_stability, REASON_LOW_STABILITY)
        .require(
            combined.max_drawdown_percent <= policy.max_combined_drawdown_percent,
            REASON_EXCESSIVE_DRAWDOWN,
        )
        .verdict();

    Ok(WalkForwardReport {
        optimize_bars,
        test_bars,
        combination_budget: policy.combination_budget,
        steps_per_param: steps,
        ranges,
        windows,
        combined_out_of_sample: combined,
        walk_forward_efficiency: comparison.walk_forward_efficiency,
        parameter_stability: comparison.parameter_stability,
        parameter_drift,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_tile_and_drop_partial_tail() {
        let w = create_windows(1000, 300, 100).unwrap();
        assert_eq!(w.len(), 7);
        assert_eq!((w[0].opt_start, w[0].opt_end, w[0].test_end), (0, 300, 400));
        assert_eq!((w[6].opt_start, w[6].test_start, w[6].test_end), (600, 900, 1000));
        for pair in w.windows(2) {
            assert_eq!(pair[1].opt_start, pair[0].opt_start + 100);
        }
    }

    #[test]
    fn invalid_sizing_is_fatal() {
        assert!(matches!(create_windows(1000, 0, 100), Err(PipelineError::InvalidWindowSizing(_))));
        assert!(matches!(create_windows(350, 300, 100), Err(PipelineError::InvalidWindowSizing(_))));
    }

    #[test]
    fn months_convert_through_bar_spacing() {
        let policy = WalkForwardPolicy::default();
        // Daily bars: 3 months ~ 91 bars, 1 month ~ 30 bars.
        assert_eq!(resolve_window_sizes(&policy, Some(86_400.0)).unwrap(), (91, 30));
        assert!(resolve_window_sizes(&policy, None).is_err());
        let explicit = WalkForwardPolicy {
            optimize_bars: Some(500),
            test_bars: Some(120),
            ..WalkForwardPolicy::default()
        };
        assert_eq!(resolve_window_sizes(&explicit, None).unwrap(), (500, 120));
    }

    #[test]
    fn drift_counts_changes_above_epsilon() {
        let p = |a: f64, b: f64| -> StrategyParams { [("a", a), ("b", b)].into_iter().collect() };
        let sets = [p(10.0, 0.5), p(10.0, 0.5), p(12.0, 0.5), p(12.0, 0.6)];
        let refs: Vec<&StrategyParams> = sets.iter().collect();
        let tuned = vec!["a".to_string(), "b".to_string()];
        let d = parameter_drift(&refs, &tuned, 1e-9);
        assert_eq!(d.total_changes, 2);
        assert!((d.average_changed_params_per_window - 2.0 / 3.0).abs() < 1e-12);
        assert!((d.changed_param_rate_per_window - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(d.per_param_distinct_values["a"], 2);
        assert_eq!(d.per_param_changes["b"], 1);
    }

    #[test]
    fn single_window_has_no_drift() {
        let only: StrategyParams = [("a", 1.0)].into_iter().collect();
        let d = parameter_drift(&[&only], &["a".to_string()], 1e-9);
        assert_eq!(d.average_changed_params_per_window, 0.0);
        assert_eq!(d.per_param_distinct_values["a"], 1);
    }
}
