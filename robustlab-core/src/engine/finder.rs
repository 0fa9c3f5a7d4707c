//! Seeded random-search finder.
//!
//! Each seed draws `samples` parameter sets from the strategy's derived ranges
//! and pushes them through three gates:
//!
//! - stage A: trade floor on the full slice
//! - stage B: positive net profit, profit factor floor, drawdown ceiling
//! - stage C: enough contiguous folds must be profitable on their own
//!
//! Survivors are ranked by robust score (median fold profit minus a
//! dispersion penalty). The same seed and strategy always draw the same
//! samples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    BacktestResult, BacktestSettings, Bar, SearchAudit, SearchOutcome, SeedRun, StrategyDescriptor,
    StrategyParams, PASS,
};
use crate::metrics::{expectancy_percent, mean_f64, std_dev};
use crate::stats::median;

use super::ranges::ranges_with_steps;
use super::{BacktestEngine, CandidateSearch, EngineError};

pub const REJECT_MIN_TRADES: &str = "stage_a_min_trades";
pub const REJECT_NON_POSITIVE_PROFIT: &str = "stage_b_non_positive_profit";
pub const REJECT_LOW_PROFIT_FACTOR: &str = "stage_b_low_profit_factor";
pub const REJECT_DRAWDOWN_BREACH: &str = "stage_b_drawdown_breach";
pub const REJECT_FOLD_INSTABILITY: &str = "stage_c_fold_instability";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FinderConfig {
    /// Parameter sets drawn per seed.
    pub samples: usize,
    /// Contiguous folds checked in stage C.
    pub folds: usize,
    /// Grid points per tunable parameter.
    pub steps_per_param: usize,
    pub min_profit_factor: f64,
    pub max_drawdown_percent: f64,
    /// Share of folds that must be profitable.
    pub min_fold_pass_rate: f64,
    pub stability_penalty_weight: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            samples: 48,
            folds: 3,
            steps_per_param: 6,
            min_profit_factor: 1.05,
            max_drawdown_percent: 35.0,
            min_fold_pass_rate: 0.67,
            stability_penalty_weight: 0.5,
        }
    }
}

/// Derive the RNG seed for one `(seed, strategy)` pair.
pub fn search_seed(seed: u64, strategy_key: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(strategy_key.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

#[derive(Debug, Clone)]
pub struct RandomSearchFinder<E> {
    engine: E,
    config: FinderConfig,
}

struct Survivor {
    params: StrategyParams,
    result: BacktestResult,
    robust_score: f64,
    penalty: f64,
}

impl<E: BacktestEngine> RandomSearchFinder<E> {
    pub fn new(engine: E, config: FinderConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn sample(&self, strategy: &StrategyDescriptor, rng: &mut StdRng) -> Vec<StrategyParams> {
        let tunable = strategy.tunable_params();
        let ranges = ranges_with_steps(&strategy.default_params, &tunable, self.config.steps_per_param);
        let grids: Vec<(String, Vec<f64>)> = ranges.iter().map(|r| (r.name.clone(), r.values())).collect();

        (0..self.config.samples)
            .map(|_| {
                grids.iter().fold(strategy.default_params.clone(), |params, (name, values)| {
                    let pick = values[rng.gen_range(0..values.len())];
                    params.with(name, pick)
                })
            })
            .collect()
    }

    /// Net profit of each contiguous fold; empty when there are fewer bars than folds.
    fn fold_profits(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        params: &StrategyParams,
        settings: &BacktestSettings,
    ) -> Result<Vec<f64>, EngineError> {
        let folds = self.config.folds.max(1);
        let len = bars.len() / folds;
        if len == 0 {
            return Ok(Vec::new());
        }
        (0..folds)
            .map(|f| {
                let end = if f + 1 == folds { bars.len() } else { (f + 1) * len };
                self.engine
                    .backtest(&bars[f * len..end], strategy, params, settings)
                    .map(|r| r.net_profit_percent)
            })
            .collect()
    }
}

impl<E: BacktestEngine> CandidateSearch for RandomSearchFinder<E> {
    fn search(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        seed: u64,
        settings: &BacktestSettings,
    ) -> Result<SearchOutcome, EngineError> {
        let mut rng = StdRng::seed_from_u64(search_seed(seed, &strategy.key));
        let candidates = self.sample(strategy, &mut rng);

        let mut audit = SearchAudit {
            samples: candidates.len(),
            ..SearchAudit::default()
        };
        let mut stage_a_expectancy = Vec::new();
        let mut dd_breaches = 0usize;
        let mut best: Option<Survivor> = None;

        for params in candidates {
            let result = self.engine.backtest(bars, strategy, &params, settings)?;

            if result.total_trades < settings.min_trades {
                audit.reject(REJECT_MIN_TRADES);
                continue;
            }
            audit.stage_a_survivors += 1;
            stage_a_expectancy.push(expectancy_percent(&result.trades));
            if result.max_drawdown_percent > self.config.max_drawdown_percent {
                dd_breaches += 1;
            }

            if result.net_profit_percent <= 0.0 {
                audit.reject(REJECT_NON_POSITIVE_PROFIT);
                continue;
            }
            if result.profit_factor < self.config.min_profit_factor {
                audit.reject(REJECT_LOW_PROFIT_FACTOR);
                continue;
            }
            if result.max_drawdown_percent > self.config.max_drawdown_percent {
                audit.reject(REJECT_DRAWDOWN_BREACH);
                continue;
            }
            audit.stage_b_survivors += 1;

            let profits = self.fold_profits(bars, strategy, &params, settings)?;
            let positive = profits.iter().filter(|p| **p > 0.0).count();
            let fold_rate = if profits.is_empty() {
                0.0
            } else {
                positive as f64 / profits.len() as f64
            };
            if fold_rate < self.config.min_fold_pass_rate {
                audit.reject(REJECT_FOLD_INSTABILITY);
                continue;
            }
            audit.stage_c_survivors += 1;

            let penalty = self.config.stability_penalty_weight * std_dev(&profits);
            let robust_score = median(&profits).unwrap_or(0.0) - penalty;
            if best.as_ref().map_or(true, |b| robust_score > b.robust_score) {
                best = Some(Survivor {
                    params,
                    result,
                    robust_score,
                    penalty,
                });
            }
        }

        let pass_rate = if audit.samples == 0 {
            0.0
        } else {
            audit.stage_c_survivors as f64 / audit.samples as f64
        };
        audit.top_decile_expectancy = top_decile_mean(&mut stage_a_expectancy);
        if audit.stage_a_survivors > 0 {
            audit.dd_breach_rate = Some(dd_breaches as f64 / audit.stage_a_survivors as f64);
        }

        debug!(
            strategy = %strategy.key,
            seed,
            samples = audit.samples,
            stage_a = audit.stage_a_survivors,
            stage_b = audit.stage_b_survivors,
            stage_c = audit.stage_c_survivors,
            "search finished"
        );

        let run = match best {
            Some(winner) => {
                audit.fold_stability_penalty = Some(winner.penalty);
                SeedRun {
                    seed,
                    passed: true,
                    robust_score: winner.robust_score,
                    pass_rate,
                    stage_c_survivors: audit.stage_c_survivors,
                    params: Some(winner.params),
                    result: Some(winner.result),
                    decision_reason: PASS.to_string(),
                }
            }
            None => SeedRun::no_pass(seed, pass_rate),
        };
        Ok(SearchOutcome { run, audit })
    }
}

/// Mean of the best tenth (at least one value).
fn top_decile_mean(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| b.total_cmp(a));
    let take = values.len().div_ceil(10);
    Some(mean_f64(&values[..take]))
}
