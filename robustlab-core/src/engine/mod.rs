//! Engine seams: the two external collaborators the pipeline drives.
//!
//! - [`BacktestEngine`]: deterministic simulation of one parameter set on a bar
//!   slice, plus in-sample optimization and the walk-forward window comparison
//!   (both with default implementations built on `backtest`).
//! - [`CandidateSearch`]: seeded stochastic parameter search ("finder") that
//!   returns a [`SearchOutcome`] with its stage statistics attached.
//!
//! [`ReferenceEngine`] and [`RandomSearchFinder`] are the in-tree
//! implementations used by the CLI and integration tests.

pub mod finder;
pub mod ranges;
pub mod reference;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    BacktestResult, BacktestSettings, Bar, SearchOutcome, StrategyDescriptor, StrategyParams,
};
use crate::metrics::{mean_f64, std_dev};

pub use finder::{FinderConfig, RandomSearchFinder};
pub use ranges::{derive_range, derive_ranges, expand_grid, grid_size, ParamRange, RangeKind};
pub use reference::{reference_catalog, ReferenceEngine, CHANNEL_BREAKOUT, SMA_CROSS};

/// Score given to parameter sets that miss the trade floor.
const BELOW_TRADE_FLOOR: f64 = -1.0e6;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("strategy '{0}' is not supported by this engine")]
    UnsupportedStrategy(String),
    #[error("parameter grid for '{0}' is empty")]
    EmptyGrid(String),
    #[error("engine failure: {0}")]
    Failed(String),
}

/// Best in-sample parameter set of one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimization {
    pub params: StrategyParams,
    pub in_sample: BacktestResult,
    pub score: f64,
}

/// In/out-of-sample figures of one walk-forward window, as the engine sees them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPerformance {
    pub in_sample_bars: usize,
    pub out_of_sample_bars: usize,
    pub in_sample_net_profit_percent: f64,
    pub out_of_sample_net_profit_percent: f64,
}

/// Engine-side verdict inputs derived from all windows together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowComparison {
    /// Out-of-sample return per bar relative to in-sample return per bar.
    pub walk_forward_efficiency: f64,
    /// 0..=100, higher means more consistent out-of-sample results.
    pub parameter_stability: f64,
}

/// Deterministic backtest engine.
pub trait BacktestEngine {
    fn backtest(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        params: &StrategyParams,
        settings: &BacktestSettings,
    ) -> Result<BacktestResult, EngineError>;

    /// Exhaustive grid search over `ranges`; highest in-sample score wins, first on ties.
    fn optimize(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        ranges: &[ParamRange],
        settings: &BacktestSettings,
    ) -> Result<Optimization, EngineError> {
        let mut best: Option<Optimization> = None;
        for params in expand_grid(&strategy.default_params, ranges) {
            let in_sample = self.backtest(bars, strategy, &params, settings)?;
            let score = in_sample_score(&in_sample, settings.min_trades);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Optimization {
                    params,
                    in_sample,
                    score,
                });
            }
        }
        best.ok_or_else(|| EngineError::EmptyGrid(strategy.key.clone()))
    }

    fn compare_windows(&self, windows: &[WindowPerformance]) -> WindowComparison {
        default_window_comparison(windows)
    }
}

/// Seeded stochastic parameter search.
pub trait CandidateSearch {
    fn search(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        seed: u64,
        settings: &BacktestSettings,
    ) -> Result<SearchOutcome, EngineError>;
}

/// Net profit penalized by half the drawdown; sets below the trade floor rank last.
pub fn in_sample_score(result: &BacktestResult, min_trades: usize) -> f64 {
    if result.total_trades < min_trades {
        return BELOW_TRADE_FLOOR + result.total_trades as f64;
    }
    result.net_profit_percent - 0.5 * result.max_drawdown_percent
}

/// Efficiency = mean OOS return per bar / mean IS return per bar (0 when IS <= 0).
/// Stability = 100 * (1 - cv / 2) of OOS net profits, cv capped at 2.
pub fn default_window_comparison(windows: &[WindowPerformance]) -> WindowComparison {
    if windows.is_empty() {
        return WindowComparison {
            walk_forward_efficiency: 0.0,
            parameter_stability: 0.0,
        };
    }

    let per_bar = |profit: f64, bars: usize| if bars == 0 { 0.0 } else { profit / bars as f64 };
    let is_rates: Vec<f64> = windows
        .iter()
        .map(|w| per_bar(w.in_sample_net_profit_percent, w.in_sample_bars))
        .collect();
    let oos_rates: Vec<f64> = windows
        .iter()
        .map(|w| per_bar(w.out_of_sample_net_profit_percent, w.out_of_sample_bars))
        .collect();
    let mean_is = mean_f64(&is_rates);
    let walk_forward_efficiency = if mean_is <= 0.0 {
        0.0
    } else {
        mean_f64(&oos_rates) / mean_is
    };

    let oos_profits: Vec<f64> = windows.iter().map(|w| w.out_of_sample_net_profit_percent).collect();
    let parameter_stability = if oos_profits.len() < 2 {
        100.0
    } else {
        let mean = mean_f64(&oos_profits);
        let cv = if mean.abs() < 1e-12 {
            2.0
        } else {
            (std_dev(&oos_profits) / mean.abs()).min(2.0)
        };
        100.0 * (1.0 - cv / 2.0)
    };

    WindowComparison {
        walk_forward_efficiency,
        parameter_stability,
    }
}
