//! Reference engine: two small trend strategies on a next-bar-open simulator.
//!
//! Signals are evaluated on the close of bar `i` and executed at the open of
//! bar `i + 1`, so no strategy ever sees the bar it trades on. Costs are charged
//! per side as commission percent plus slippage basis points.

use crate::domain::{
    BacktestResult, BacktestSettings, Bar, PositionSide, StrategyCatalog, StrategyDescriptor,
    StrategyParams, TradeFilter, TradeRecord,
};

use super::{BacktestEngine, EngineError};

pub const SMA_CROSS: &str = "sma_cross";
pub const CHANNEL_BREAKOUT: &str = "channel_breakout";

/// Long-term average length used by [`TradeFilter::Trend`].
const TREND_FILTER_PERIOD: usize = 200;

/// The strategies [`ReferenceEngine`] can simulate.
pub fn reference_catalog() -> StrategyCatalog {
    StrategyCatalog::new([
        StrategyDescriptor {
            key: SMA_CROSS.to_string(),
            default_params: [
                ("fast_period", 10.0),
                ("slow_period", 40.0),
                ("stop_loss_fraction", 0.05),
                ("use_stop_loss", 1.0),
            ]
            .into_iter()
            .collect(),
            walk_forward_params: vec![
                "fast_period".to_string(),
                "slow_period".to_string(),
                "stop_loss_fraction".to_string(),
            ],
        },
        StrategyDescriptor {
            key: CHANNEL_BREAKOUT.to_string(),
            default_params: [
                ("lookback", 20.0),
                ("exit_lookback", 10.0),
                ("stop_loss_fraction", 0.08),
                ("use_stop_loss", 0.0),
            ]
            .into_iter()
            .collect(),
            walk_forward_params: Vec::new(),
        },
    ])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEngine;

impl BacktestEngine for ReferenceEngine {
    fn backtest(
        &self,
        bars: &[Bar],
        strategy: &StrategyDescriptor,
        params: &StrategyParams,
        settings: &BacktestSettings,
    ) -> Result<BacktestResult, EngineError> {
        let signal = match strategy.key.as_str() {
            SMA_CROSS => sma_cross_signal(bars, params),
            CHANNEL_BREAKOUT => channel_breakout_signal(bars, params),
            other => return Err(EngineError::UnsupportedStrategy(other.to_string())),
        };
        Ok(simulate(bars, &signal, params, settings))
    }
}

fn period(params: &StrategyParams, name: &str, fallback: f64, min: usize) -> usize {
    (params.get_or(name, fallback).round().max(0.0) as usize).max(min)
}

/// Simple moving average; `None` until `period` closes are available.
fn sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for i in 0..closes.len() {
        sum += closes[i];
        if i >= period {
            sum -= closes[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

fn sma_cross_signal(bars: &[Bar], params: &StrategyParams) -> Vec<i8> {
    let fast_period = period(params, "fast_period", 10.0, 1);
    let slow_period = period(params, "slow_period", 40.0, fast_period + 1);
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast = sma(&closes, fast_period);
    let slow = sma(&closes, slow_period);

    fast.iter()
        .zip(&slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) if f > s => 1,
            (Some(f), Some(s)) if f < s => -1,
            _ => 0,
        })
        .collect()
}

fn channel_breakout_signal(bars: &[Bar], params: &StrategyParams) -> Vec<i8> {
    let lookback = period(params, "lookback", 20.0, 2);
    let exit_lookback = period(params, "exit_lookback", 10.0, 1);
    let highest = |from: usize, to: usize| bars[from..to].iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lowest = |from: usize, to: usize| bars[from..to].iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let mut signal = vec![0i8; bars.len()];
    let mut state = 0i8;
    for i in lookback.max(exit_lookback)..bars.len() {
        let close = bars[i].close;
        if close > highest(i - lookback, i) {
            state = 1;
        } else if close < lowest(i - lookback, i) {
            state = -1;
        } else if state == 1 && close < lowest(i - exit_lookback, i) {
            state = 0;
        } else if state == -1 && close > highest(i - exit_lookback, i) {
            state = 0;
        }
        signal[i] = state;
    }
    signal
}

struct OpenPosition {
    side: PositionSide,
    entry_price: f64,
    entry_time: i64,
    entry_equity: f64,
}

impl OpenPosition {
    fn gross_return(&self, price: f64) -> f64 {
        self.side.sign() * (price / self.entry_price - 1.0)
    }
}

fn side_of(signal: i8) -> Option<PositionSide> {
    match signal {
        1 => Some(PositionSide::Long),
        -1 => Some(PositionSide::Short),
        _ => None,
    }
}

fn simulate(bars: &[Bar], signal: &[i8], params: &StrategyParams, settings: &BacktestSettings) -> BacktestResult {
    if bars.is_empty() {
        return BacktestResult::flat(settings.initial_capital, 1);
    }

    let cost = settings.costs.per_side_fraction();
    let use_stop = params.get_or("use_stop_loss", 0.0) >= 0.5;
    let stop_fraction = params.get_or("stop_loss_fraction", 0.0);
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let trend = match settings.filter {
        TradeFilter::Trend => Some(sma(&closes, TREND_FILTER_PERIOD)),
        TradeFilter::None => None,
    };

    // Desired side after direction and filter gating, decided on the close of `i`.
    let desired = |i: usize| -> Option<PositionSide> {
        let side = side_of(signal[i])?;
        let allowed = match side {
            PositionSide::Long => settings.direction.allows_long(),
            PositionSide::Short => settings.direction.allows_short(),
        };
        if !allowed {
            return None;
        }
        if let Some(trend) = &trend {
            let avg = trend[i]?;
            let aligned = match side {
                PositionSide::Long => closes[i] > avg,
                PositionSide::Short => closes[i] < avg,
            };
            if !aligned {
                return None;
            }
        }
        Some(side)
    };

    let mut equity = settings.initial_capital;
    let mut curve = Vec::with_capacity(bars.len());
    let mut trades = Vec::new();
    let mut position: Option<OpenPosition> = None;
    // Side stopped out most recently; blocks re-entry until the signal changes.
    let mut stopped: Option<PositionSide> = None;

    let close_trade = |pos: OpenPosition, price: f64, time: i64, trades: &mut Vec<TradeRecord>| -> f64 {
        let net = pos.gross_return(price) - 2.0 * cost;
        trades.push(TradeRecord {
            side: pos.side,
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time: time,
            exit_price: price,
            return_percent: net * 100.0,
        });
        (pos.entry_equity * (1.0 + net)).max(0.0)
    };

    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            let want = desired(i - 1);
            if stopped.is_some() && want != stopped {
                stopped = None;
            }
            if let Some(pos) = position.take() {
                if want == Some(pos.side) {
                    position = Some(pos);
                } else {
                    equity = close_trade(pos, bar.open, bar.time, &mut trades);
                }
            }
            if position.is_none() && stopped.is_none() && equity > 0.0 {
                if let Some(side) = want {
                    position = Some(OpenPosition {
                        side,
                        entry_price: bar.open,
                        entry_time: bar.time,
                        entry_equity: equity,
                    });
                }
            }
        }

        if use_stop && stop_fraction > 0.0 {
            if let Some(pos) = position.take() {
                let stop_price = match pos.side {
                    PositionSide::Long => pos.entry_price * (1.0 - stop_fraction),
                    PositionSide::Short => pos.entry_price * (1.0 + stop_fraction),
                };
                let hit = match pos.side {
                    PositionSide::Long => bar.low <= stop_price,
                    PositionSide::Short => bar.high >= stop_price,
                };
                if hit {
                    // Gaps through the stop fill at the open.
                    let fill = match pos.side {
                        PositionSide::Long => stop_price.min(bar.open),
                        PositionSide::Short => stop_price.max(bar.open),
                    };
                    stopped = Some(pos.side);
                    equity = close_trade(pos, fill, bar.time, &mut trades);
                } else {
                    position = Some(pos);
                }
            }
        }

        let marked = match &position {
            Some(pos) => (pos.entry_equity * (1.0 + pos.gross_return(bar.close) - cost)).max(0.0),
            None => equity,
        };
        curve.push(marked);
    }

    if let Some(pos) = position.take() {
        let last = bars[bars.len() - 1];
        equity = close_trade(pos, last.close, last.time, &mut trades);
        if let Some(end) = curve.last_mut() {
            *end = equity;
        }
    }

    BacktestResult::compute(curve, trades, settings.periods_per_year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TradeDirection, TradingCosts};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                time: i as i64 * 3600,
                open: c,
                high: c * 1.001,
                low: c * 0.999,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    fn frictionless() -> BacktestSettings {
        BacktestSettings {
            costs: TradingCosts {
                commission_percent: 0.0,
                slippage_bps: 0.0,
            },
            ..BacktestSettings::default()
        }
    }

    fn strategy(key: &str) -> StrategyDescriptor {
        reference_catalog().get(key).cloned().unwrap()
    }

    #[test]
    fn sma_warms_up() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn rising_market_is_profitable_long() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let s = strategy(SMA_CROSS);
        let r = ReferenceEngine.backtest(&bars, &s, &s.default_params, &frictionless()).unwrap();
        assert!(r.net_profit_percent > 0.0);
        assert_eq!(r.total_trades, 1);
        assert_eq!(r.equity_curve.len(), bars.len());
    }

    #[test]
    fn falling_market_long_only_never_trades() {
        let closes: Vec<f64> = (0..300).map(|i| 300.0 - i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let s = strategy(SMA_CROSS);
        let r = ReferenceEngine.backtest(&bars, &s, &s.default_params, &frictionless()).unwrap();
        assert_eq!(r.total_trades, 0);
        assert_eq!(r.net_profit_percent, 0.0);
    }

    #[test]
    fn falling_market_short_profits() {
        let closes: Vec<f64> = (0..300).map(|i| 300.0 - i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let s = strategy(SMA_CROSS);
        let settings = BacktestSettings {
            direction: TradeDirection::Short,
            ..frictionless()
        };
        let r = ReferenceEngine.backtest(&bars, &s, &s.default_params, &settings).unwrap();
        assert!(r.net_profit_percent > 0.0);
    }

    #[test]
    fn costs_reduce_profit() {
        let closes: Vec<f64> = (0..400)
            .map(|i| 100.0 + (i as f64 / 15.0).sin() * 10.0 + i as f64 * 0.05)
            .collect();
        let bars = bars_from_closes(&closes);
        let s = strategy(CHANNEL_BREAKOUT);
        let free = ReferenceEngine.backtest(&bars, &s, &s.default_params, &frictionless()).unwrap();
        let costly = ReferenceEngine
            .backtest(&bars, &s, &s.default_params, &BacktestSettings::default())
            .unwrap();
        assert!(free.total_trades > 0);
        assert!(costly.net_profit_percent < free.net_profit_percent);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut s = strategy(SMA_CROSS);
        s.key = "mystery".into();
        let err = ReferenceEngine.backtest(&[], &s, &s.default_params, &frictionless()).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStrategy(_)));
    }

    #[test]
    fn stop_loss_caps_trade_loss() {
        // Trend up to trigger a long, then a crash.
        let mut closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..20).map(|i| 179.0 - i as f64 * 8.0));
        let bars = bars_from_closes(&closes);
        let s = strategy(SMA_CROSS);
        let r = ReferenceEngine.backtest(&bars, &s, &s.default_params, &frictionless()).unwrap();
        let worst = r.trades.iter().map(|t| t.return_percent).fold(f64::MAX, f64::min);
        assert!(worst >= -10.0, "worst trade {worst}");
    }
}
