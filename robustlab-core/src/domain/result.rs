//! BacktestResult: the immutable output of one (bars, params) simulation.

use serde::{Deserialize, Serialize};

use super::trade::TradeRecord;
use crate::metrics;

/// Complete result of a single backtest.
///
/// Built once through [`BacktestResult::compute`]; the metric fields are always
/// consistent with `equity_curve` and `trades`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub net_profit_percent: f64,
    /// Peak-to-trough drawdown in percent, reported as a positive number.
    pub max_drawdown_percent: f64,
    pub profit_factor: f64,
    /// Fraction of winning trades in [0, 1].
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<f64>,
}

/// Metrics-only projection of a [`BacktestResult`], used in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub net_profit_percent: f64,
    pub max_drawdown_percent: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
}

impl BacktestResult {
    /// Compute all metrics from an equity curve and trade list.
    pub fn compute(equity_curve: Vec<f64>, trades: Vec<TradeRecord>, periods_per_year: f64) -> Self {
        Self {
            net_profit_percent: metrics::total_return(&equity_curve) * 100.0,
            max_drawdown_percent: metrics::max_drawdown(&equity_curve) * 100.0,
            profit_factor: metrics::profit_factor(&trades),
            win_rate: metrics::win_rate(&trades),
            sharpe_ratio: metrics::sharpe_ratio(&equity_curve, periods_per_year),
            total_trades: trades.len(),
            trades,
            equity_curve,
        }
    }

    /// Result of a run that never traded on `bar_count` bars.
    pub fn flat(initial_capital: f64, bar_count: usize) -> Self {
        Self::compute(vec![initial_capital; bar_count.max(1)], Vec::new(), 1.0)
    }

    /// Concatenate consecutive segment results into one.
    ///
    /// Each segment's equity curve is rescaled to start where the previous one
    /// ended, so returns compound across segments. Trades are concatenated in
    /// order, which keeps `total_trades` equal to the sum over segments.
    pub fn stitch(segments: &[BacktestResult], periods_per_year: f64) -> Self {
        let mut equity: Vec<f64> = Vec::new();
        let mut trades: Vec<TradeRecord> = Vec::new();

        for segment in segments {
            trades.extend(segment.trades.iter().cloned());
            let Some(&seg_start) = segment.equity_curve.first() else {
                continue;
            };
            match equity.last().copied() {
                None => equity.extend_from_slice(&segment.equity_curve),
                Some(end) => {
                    let scale = if seg_start > 0.0 { end / seg_start } else { 1.0 };
                    equity.extend(segment.equity_curve.iter().skip(1).map(|v| v * scale));
                }
            }
        }

        Self::compute(equity, trades, periods_per_year)
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            net_profit_percent: self.net_profit_percent,
            max_drawdown_percent: self.max_drawdown_percent,
            profit_factor: self.profit_factor,
            win_rate: self.win_rate,
            sharpe_ratio: self.sharpe_ratio,
            total_trades: self.total_trades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionSide;

    fn trade(ret: f64) -> TradeRecord {
        TradeRecord {
            side: PositionSide::Long,
            entry_time: 0,
            entry_price: 100.0,
            exit_time: 60,
            exit_price: 100.0,
            return_percent: ret,
        }
    }

    #[test]
    fn compute_is_consistent() {
        let r = BacktestResult::compute(vec![100.0, 110.0, 99.0, 121.0], vec![trade(10.0), trade(-10.0), trade(22.2)], 252.0);
        assert!((r.net_profit_percent - 21.0).abs() < 1e-9);
        assert!((r.max_drawdown_percent - 10.0).abs() < 1e-9);
        assert_eq!(r.total_trades, 3);
    }

    #[test]
    fn stitch_compounds_and_sums_trades() {
        let a = BacktestResult::compute(vec![100.0, 110.0], vec![trade(10.0)], 252.0);
        let b = BacktestResult::compute(vec![100.0, 90.0, 120.0], vec![trade(-10.0), trade(33.3)], 252.0);
        let combined = BacktestResult::stitch(&[a.clone(), b.clone()], 252.0);

        assert_eq!(combined.total_trades, a.total_trades + b.total_trades);
        let expected = [100.0, 110.0, 99.0, 132.0];
        assert_eq!(combined.equity_curve.len(), expected.len());
        for (got, want) in combined.equity_curve.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!((combined.net_profit_percent - 32.0).abs() < 1e-9);
        assert!((combined.max_drawdown_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn stitch_of_nothing_is_empty() {
        let combined = BacktestResult::stitch(&[], 252.0);
        assert_eq!(combined.total_trades, 0);
        assert_eq!(combined.net_profit_percent, 0.0);
    }

    #[test]
    fn flat_result_has_no_trades() {
        let r = BacktestResult::flat(10_000.0, 5);
        assert_eq!(r.total_trades, 0);
        assert_eq!(r.net_profit_percent, 0.0);
        assert_eq!(r.max_drawdown_percent, 0.0);
    }
}
