//! Scripted engine and search stubs shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use robustlab_core::domain::{
    BacktestResult, BacktestSettings, Bar, PositionSide, SearchAudit, SearchOutcome, SeedRun,
    StrategyDescriptor, StrategyParams, TradeRecord, PASS,
};
use robustlab_core::engine::{BacktestEngine, CandidateSearch, EngineError, WindowComparison, WindowPerformance};

pub const START: i64 = 1_704_067_200;

/// `n` hourly bars drifting upward.
pub fn bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 + i as f64 * 0.1;
            Bar {
                time: START + i as i64 * 3600,
                open: close - 0.05,
                high: close + 0.2,
                low: close - 0.2,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

pub fn strategy() -> StrategyDescriptor {
    StrategyDescriptor {
        key: "stub".to_string(),
        default_params: [("x", 10.0)].into_iter().collect(),
        walk_forward_params: Vec::new(),
    }
}

pub fn params(x: f64) -> StrategyParams {
    [("x", x)].into_iter().collect()
}

/// Net profit figures go through an equity curve, so compare with a tolerance.
pub fn assert_near(actual: Option<f64>, expected: f64) {
    match actual {
        Some(v) => assert!((v - expected).abs() < 1e-9, "expected {expected}, got {v}"),
        None => panic!("expected {expected}, got None"),
    }
}

/// A result with one trade returning `net_percent`.
pub fn result_with(net_percent: f64, bars: &[Bar]) -> BacktestResult {
    let start = bars.first().map_or(START, |b| b.time);
    let end = bars.last().map_or(START, |b| b.time);
    let trade = TradeRecord {
        side: PositionSide::Long,
        entry_time: start,
        entry_price: 100.0,
        exit_time: end,
        exit_price: 100.0 * (1.0 + net_percent / 100.0),
        return_percent: net_percent,
    };
    BacktestResult::compute(
        vec![10_000.0, 10_000.0 * (1.0 + net_percent / 100.0)],
        vec![trade],
        252.0,
    )
}

/// Backtests return a fixed net profit per value of `x`; unknown values lose nothing.
#[derive(Default)]
pub struct TableEngine {
    pub net_by_x: BTreeMap<i64, f64>,
    pub comparison: Option<WindowComparison>,
    pub calls: Mutex<Vec<(usize, f64)>>,
}

impl TableEngine {
    pub fn new(rows: &[(i64, f64)]) -> Self {
        Self {
            net_by_x: rows.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn call_log(&self) -> Vec<(usize, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl BacktestEngine for TableEngine {
    fn backtest(
        &self,
        bars: &[Bar],
        _strategy: &StrategyDescriptor,
        params: &StrategyParams,
        _settings: &BacktestSettings,
    ) -> Result<BacktestResult, EngineError> {
        let x = params.get_or("x", 0.0);
        self.calls.lock().unwrap().push((bars.len(), x));
        let net = self.net_by_x.get(&(x.round() as i64)).copied().unwrap_or(0.0);
        Ok(result_with(net, bars))
    }

    fn compare_windows(&self, windows: &[WindowPerformance]) -> WindowComparison {
        match self.comparison {
            Some(c) => c,
            None => robustlab_core::engine::default_window_comparison(windows),
        }
    }
}

/// Per-seed scripted search: `Some(net)` passes with `x = seed`, `None` finds nothing.
#[derive(Default)]
pub struct ScriptedSearch {
    pub script: BTreeMap<u64, Option<f64>>,
    pub seen: Mutex<Vec<(u64, usize, f64)>>,
}

impl ScriptedSearch {
    pub fn new(rows: &[(u64, Option<f64>)]) -> Self {
        Self {
            script: rows.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// `(seed, bar count, slippage bps)` of every call.
    pub fn seen(&self) -> Vec<(u64, usize, f64)> {
        self.seen.lock().unwrap().clone()
    }
}

impl CandidateSearch for ScriptedSearch {
    fn search(
        &self,
        bars: &[Bar],
        _strategy: &StrategyDescriptor,
        seed: u64,
        settings: &BacktestSettings,
    ) -> Result<SearchOutcome, EngineError> {
        self.seen.lock().unwrap().push((seed, bars.len(), settings.costs.slippage_bps));
        let mut audit = SearchAudit {
            samples: 10,
            stage_a_survivors: 6,
            stage_b_survivors: 3,
            ..SearchAudit::default()
        };
        let run = match self.script.get(&seed).copied().flatten() {
            Some(net) => {
                audit.stage_c_survivors = 1;
                SeedRun {
                    seed,
                    passed: true,
                    robust_score: net,
                    pass_rate: 0.1,
                    stage_c_survivors: 1,
                    params: Some(params(seed as f64)),
                    result: Some(result_with(net, bars)),
                    decision_reason: PASS.to_string(),
                }
            }
            None => {
                audit.reject("stage_c_fold_instability");
                SeedRun::no_pass(seed, 0.0)
            }
        };
        Ok(SearchOutcome { run, audit })
    }
}
