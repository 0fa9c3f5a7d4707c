//! Blind out-of-sample split test.
//!
//! The series is cut once at `floor(N * split_ratio)`. Every seed searches the
//! training part only; the parameters it finds are then replayed unchanged on
//! the blind tail, which no search ever saw.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use robustlab_core::domain::{BacktestSettings, Bar, ResultSummary, StrategyDescriptor, StrategyParams};
use robustlab_core::engine::{BacktestEngine, CandidateSearch};
use robustlab_core::stats::median;

use crate::audit::CellAudit;
use crate::runner::PipelineError;
use crate::verdict::{Checks, Verdict};

pub const PHASE_OOS_TRAIN: &str = "oos_train";

pub const REASON_INSUFFICIENT_TRAIN_PASSES: &str = "insufficient_train_seed_passes";
pub const REASON_INSUFFICIENT_BLIND_POSITIVE: &str = "insufficient_blind_positive_seeds";
pub const REASON_NON_POSITIVE_BLIND_MEDIAN: &str = "non_positive_blind_median_net_profit";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OosPolicy {
    /// Share of bars used for training, strictly between 0 and 1.
    pub split_ratio: f64,
    pub min_train_seed_passes: usize,
    pub min_blind_positive_seeds: usize,
    pub min_blind_median_net_profit_percent: f64,
}

impl Default for OosPolicy {
    fn default() -> Self {
        Self {
            split_ratio: 0.7,
            min_train_seed_passes: 3,
            min_blind_positive_seeds: 3,
            min_blind_median_net_profit_percent: 0.0,
        }
    }
}

/// Index of the first blind bar.
pub fn split_index(bar_count: usize, split_ratio: f64) -> usize {
    ((bar_count as f64 * split_ratio).floor() as usize).min(bar_count)
}

/// One seed's train search and blind replay.
///
/// `blind_result` is only present when the seed passed training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OosBlindSeedResult {
    pub seed: u64,
    pub train_passed: bool,
    pub robust_score: f64,
    pub params: Option<StrategyParams>,
    pub train_result: Option<ResultSummary>,
    pub blind_result: Option<ResultSummary>,
}

/// Per-parameter median of the train-passing seeds, replayed on the blind part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusCheck {
    pub params: StrategyParams,
    pub blind_result: ResultSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OosReport {
    pub split_ratio: f64,
    pub split_index: usize,
    pub train_bars: usize,
    pub blind_bars: usize,
    pub seeds: Vec<OosBlindSeedResult>,
    pub train_seed_pass_count: usize,
    pub blind_result_count: usize,
    pub blind_positive_seed_count: usize,
    pub blind_median_net_profit_percent: Option<f64>,
    pub blind_median_max_drawdown_percent: Option<f64>,
    pub blind_median_profit_factor: Option<f64>,
    /// Diagnostic only; never part of the verdict.
    pub consensus: Option<ConsensusCheck>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Median of each parameter over the given sets.
pub fn consensus_params<'a>(sets: impl IntoIterator<Item = &'a StrategyParams>) -> Option<StrategyParams> {
    let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for params in sets {
        for (name, value) in params.iter() {
            columns.entry(name).or_default().push(value);
        }
    }
    if columns.is_empty() {
        return None;
    }
    Some(
        columns
            .into_iter()
            .filter_map(|(name, values)| median(&values).map(|m| (name, m)))
            .collect(),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_oos_blind(
    engine: &dyn BacktestEngine,
    search: &dyn CandidateSearch,
    bars: &[Bar],
    strategy: &StrategyDescriptor,
    seeds: &[u64],
    settings: &BacktestSettings,
    policy: &OosPolicy,
    audit: &mut CellAudit<'_>,
) -> Result<OosReport, PipelineError> {
    let split = split_index(bars.len(), policy.split_ratio);
    let (train_bars, blind_bars) = bars.split_at(split);
    info!(strategy = %strategy.key, train = train_bars.len(), blind = blind_bars.len(), "oos split");

    let mut results = Vec::with_capacity(seeds.len());
    for &seed in seeds {
        let outcome = search.search(train_bars, strategy, seed, settings)?;
        audit.emit(PHASE_OOS_TRAIN, &outcome)?;

        let run = outcome.run;
        let blind_result = match run.candidate() {
            Some((params, _)) => Some(engine.backtest(blind_bars, strategy, params, settings)?.summary()),
            None => None,
        };
        info!(
            strategy = %strategy.key,
            seed,
            train_passed = run.passed,
            blind_net = blind_result.as_ref().map(|r| r.net_profit_percent),
            "oos seed"
        );
        results.push(OosBlindSeedResult {
            seed,
            train_passed: run.passed,
            robust_score: run.robust_score,
            train_result: run.result.as_ref().map(|r| r.summary()),
            params: run.params,
            blind_result,
        });
    }

    let train_seed_pass_count = results.iter().filter(|r| r.train_passed).count();
    let blind_results: Vec<&ResultSummary> = results.iter().filter_map(|r| r.blind_result.as_ref()).collect();
    let blind_positive_seed_count = blind_results.iter().filter(|r| r.net_profit_percent > 0.0).count();
    let blind_median =
        |f: fn(&ResultSummary) -> f64| median(&blind_results.iter().map(|r| f(r)).collect::<Vec<_>>());
    let blind_median_net_profit_percent = blind_median(|r| r.net_profit_percent);
    let blind_median_max_drawdown_percent = blind_median(|r| r.max_drawdown_percent);
    let blind_median_profit_factor = blind_median(|r| r.profit_factor);
    let blind_result_count = blind_results.len();

    let passing = results.iter().filter(|r| r.train_passed).filter_map(|r| r.params.as_ref());
    let consensus = match consensus_params(passing) {
        Some(params) => {
            let blind_result = engine.backtest(blind_bars, strategy, &params, settings)?.summary();
            Some(ConsensusCheck { params, blind_result })
        }
        None => None,
    };

    let verdict = Checks::default()
        .require(train_seed_pass_count >= policy.min_train_seed_passes, REASON_INSUFFICIENT_TRAIN_PASSES)
        .require(blind_positive_seed_count >= policy.min_blind_positive_seeds, REASON_INSUFFICIENT_BLIND_POSITIVE)
        .require(
            blind_median_net_profit_percent.is_some_and(|m| m > policy.min_blind_median_net_profit_percent),
            REASON_NON_POSITIVE_BLIND_MEDIAN,
        )
        .verdict();

    Ok(OosReport {
        split_ratio: policy.split_ratio,
        split_index: split,
        train_bars: train_bars.len(),
        blind_bars: blind_bars.len(),
        blind_result_count,
        train_seed_pass_count,
        blind_positive_seed_count,
        blind_median_net_profit_percent,
        blind_median_max_drawdown_percent,
        blind_median_profit_factor,
        seeds: results,
        consensus,
        verdict,
    })
}
