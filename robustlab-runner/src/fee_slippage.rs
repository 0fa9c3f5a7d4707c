//! Fee/slippage sensitivity ensemble.
//!
//! Slippage is derived from the instrument's tick size relative to its median
//! close, floored at a minimum, and every seed is re-searched on the full
//! series under that cost assumption.

use serde::{Deserialize, Serialize};
use tracing::info;

use robustlab_core::domain::{
    BacktestSettings, Bar, ResultSummary, StrategyDescriptor, StrategyParams, TradingCosts,
};
use robustlab_core::engine::CandidateSearch;
use robustlab_core::stats::median;

use crate::audit::CellAudit;
use crate::runner::PipelineError;
use crate::verdict::{Checks, Verdict};

pub const PHASE_FEE_SLIPPAGE: &str = "fee_slippage";

pub const REASON_INSUFFICIENT_RESULTS: &str = "insufficient_seed_results";
pub const REASON_NON_POSITIVE_MEDIAN_PROFIT: &str = "non_positive_median_net_profit";
pub const REASON_EXCESSIVE_MEDIAN_DRAWDOWN: &str = "excessive_median_drawdown";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FeeSlippagePolicy {
    pub tick_size: f64,
    pub min_slippage_bps: f64,
    pub min_seed_results: usize,
    pub min_median_net_profit_percent: f64,
    pub max_median_drawdown_percent: f64,
}

impl Default for FeeSlippagePolicy {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            min_slippage_bps: 1.0,
            min_seed_results: 3,
            min_median_net_profit_percent: 0.0,
            max_median_drawdown_percent: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlippageDerivation {
    pub tick_size: f64,
    pub median_close: Option<f64>,
    /// `tick_size / median_close * 10_000`; 0 without a positive median close.
    pub raw_slippage_bps: f64,
    pub applied_slippage_bps: f64,
    pub floored: bool,
}

pub fn derive_slippage_bps(tick_size: f64, median_close: Option<f64>, min_slippage_bps: f64) -> SlippageDerivation {
    let raw_slippage_bps = match median_close {
        Some(close) if close > 0.0 && close.is_finite() => tick_size / close * 10_000.0,
        _ => 0.0,
    };
    let floored = raw_slippage_bps < min_slippage_bps;
    SlippageDerivation {
        tick_size,
        median_close,
        raw_slippage_bps,
        applied_slippage_bps: if floored { min_slippage_bps } else { raw_slippage_bps },
        floored,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSeedResult {
    pub seed: u64,
    pub passed: bool,
    pub robust_score: f64,
    pub params: Option<StrategyParams>,
    pub result: Option<ResultSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSlippageReport {
    pub slippage: SlippageDerivation,
    pub costs: TradingCosts,
    pub seeds: Vec<FeeSeedResult>,
    pub result_count: usize,
    pub median_net_profit_percent: Option<f64>,
    pub median_max_drawdown_percent: Option<f64>,
    pub median_profit_factor: Option<f64>,
    pub median_robust_score: Option<f64>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[allow(clippy::too_many_arguments)]
pub fn run_fee_slippage(
    search: &dyn CandidateSearch,
    bars: &[Bar],
    median_close: Option<f64>,
    strategy: &StrategyDescriptor,
    seeds: &[u64],
    settings: &BacktestSettings,
    policy: &FeeSlippagePolicy,
    audit: &mut CellAudit<'_>,
) -> Result<FeeSlippageReport, PipelineError> {
    let slippage = derive_slippage_bps(policy.tick_size, median_close, policy.min_slippage_bps);
    let costs = TradingCosts {
        commission_percent: settings.costs.commission_percent,
        slippage_bps: slippage.applied_slippage_bps,
    };
    let settings = settings.with_costs(costs);
    info!(
        strategy = %strategy.key,
        raw_bps = slippage.raw_slippage_bps,
        applied_bps = slippage.applied_slippage_bps,
        "fee/slippage ensemble"
    );

    let mut results = Vec::with_capacity(seeds.len());
    for &seed in seeds {
        let outcome = search.search(bars, strategy, seed, &settings)?;
        audit.emit(PHASE_FEE_SLIPPAGE, &outcome)?;
        let run = outcome.run;
        info!(strategy = %strategy.key, seed, passed = run.passed, "fee/slippage seed");
        results.push(FeeSeedResult {
            seed,
            passed: run.passed,
            robust_score: run.robust_score,
            result: run.result.as_ref().map(|r| r.summary()),
            params: run.params,
        });
    }

    let with_result: Vec<(&FeeSeedResult, &ResultSummary)> =
        results.iter().filter_map(|s| s.result.as_ref().map(|r| (s, r))).collect();
    let median_by = |f: fn(&FeeSeedResult, &ResultSummary) -> f64| {
        median(&with_result.iter().map(|(s, r)| f(s, r)).collect::<Vec<_>>())
    };
    let result_count = with_result.len();
    let median_net_profit_percent = median_by(|_, r| r.net_profit_percent);
    let median_max_drawdown_percent = median_by(|_, r| r.max_drawdown_percent);
    let median_profit_factor = median_by(|_, r| r.profit_factor);
    let median_robust_score = median_by(|s, _| s.robust_score);

    let verdict = Checks::default()
        .require(result_count >= policy.min_seed_results, REASON_INSUFFICIENT_RESULTS)
        .require(
            median_net_profit_percent.is_some_and(|m| m > policy.min_median_net_profit_percent),
            REASON_NON_POSITIVE_MEDIAN_PROFIT,
        )
        .require(
            median_max_drawdown_percent.is_some_and(|m| m <= policy.max_median_drawdown_percent),
            REASON_EXCESSIVE_MEDIAN_DRAWDOWN,
        )
        .verdict();

    Ok(FeeSlippageReport {
        slippage,
        costs,
        seeds: results,
        result_count,
        median_net_profit_percent,
        median_max_drawdown_percent,
        median_profit_factor,
        median_robust_score,
        verdict,
    })
}
