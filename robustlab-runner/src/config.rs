//! Stress pipeline configuration, loaded from TOML.
//!
//! Every section is optional and falls back to the documented defaults:
//!
//! ```toml
//! seeds = [1, 2, 3, 4, 5]
//! strategies = ["sma_cross"]
//! filters = ["none", "trend"]
//! directions = ["long"]
//! min_bars = 1000
//!
//! [backtest]
//! commission_percent = 0.05
//!
//! [walk_forward]
//! optimize_months = 3.0
//! test_months = 1.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use robustlab_core::domain::{BacktestSettings, TradeDirection, TradeFilter, TradingCosts};
use robustlab_core::engine::FinderConfig;

use crate::audit::AuditPolicy;
use crate::fee_slippage::FeeSlippagePolicy;
use crate::oos::OosPolicy;
use crate::walk_forward::WalkForwardPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Cost and risk settings shared by every task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BacktestSection {
    pub initial_capital: f64,
    pub commission_percent: f64,
    pub slippage_bps: f64,
    pub min_trades: usize,
    pub periods_per_year: f64,
}

impl Default for BacktestSection {
    fn default() -> Self {
        let base = BacktestSettings::default();
        Self {
            initial_capital: base.initial_capital,
            commission_percent: base.costs.commission_percent,
            slippage_bps: base.costs.slippage_bps,
            min_trades: base.min_trades,
            periods_per_year: base.periods_per_year,
        }
    }
}

impl BacktestSection {
    pub fn settings(&self, filter: TradeFilter, direction: TradeDirection) -> BacktestSettings {
        BacktestSettings {
            costs: TradingCosts {
                commission_percent: self.commission_percent,
                slippage_bps: self.slippage_bps,
            },
            initial_capital: self.initial_capital,
            direction,
            filter,
            min_trades: self.min_trades,
            periods_per_year: self.periods_per_year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StressConfig {
    pub seeds: Vec<u64>,
    pub strategies: Vec<String>,
    pub filters: Vec<TradeFilter>,
    pub directions: Vec<TradeDirection>,
    /// Minimum bars a dataset needs after trimming.
    pub min_bars: usize,
    /// Keep only the most recent bars when set.
    pub max_bars: Option<usize>,
    pub output_dir: PathBuf,
    pub backtest: BacktestSection,
    pub oos: OosPolicy,
    pub walk_forward: WalkForwardPolicy,
    pub fee_slippage: FeeSlippagePolicy,
    pub search: FinderConfig,
    pub audit: AuditPolicy,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seeds: vec![1, 2, 3, 4, 5],
            strategies: Vec::new(),
            filters: vec![TradeFilter::None],
            directions: vec![TradeDirection::Long],
            min_bars: 1000,
            max_bars: None,
            output_dir: PathBuf::from("stress_out"),
            backtest: BacktestSection::default(),
            oos: OosPolicy::default(),
            walk_forward: WalkForwardPolicy::default(),
            fee_slippage: FeeSlippagePolicy::default(),
            search: FinderConfig::default(),
            audit: AuditPolicy::default(),
        }
    }
}

impl StressConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Reject policies no run could satisfy consistently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidPolicy(msg));

        if self.seeds.is_empty() {
            return invalid("seed list is empty".into());
        }
        if self.filters.is_empty() || self.directions.is_empty() {
            return invalid("at least one filter and one direction are required".into());
        }
        if !(self.oos.split_ratio > 0.0 && self.oos.split_ratio < 1.0) {
            return invalid(format!("split ratio {} is outside (0, 1)", self.oos.split_ratio));
        }
        if let Some(max) = self.max_bars {
            if max < self.min_bars {
                return invalid(format!("max bars {max} is below min bars {}", self.min_bars));
            }
        }
        if self.walk_forward.combination_budget == 0 {
            return invalid("walk-forward combination budget must be at least 1".into());
        }
        if self.search.samples == 0 || self.search.folds == 0 {
            return invalid("search samples and folds must be at least 1".into());
        }
        if self.fee_slippage.tick_size <= 0.0 || self.fee_slippage.min_slippage_bps < 0.0 {
            return invalid("tick size must be positive and min slippage non-negative".into());
        }
        if self.backtest.initial_capital <= 0.0 {
            return invalid("initial capital must be positive".into());
        }
        self.audit
            .validate()
            .map_err(|e| ConfigError::InvalidPolicy(e.to_string()))
    }
}
