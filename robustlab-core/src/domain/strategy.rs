//! Strategy descriptors, the strategy catalog, and per-run backtest settings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::params::StrategyParams;

/// Static description of a strategy the engine knows how to simulate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDescriptor {
    pub key: String,
    pub default_params: StrategyParams,
    /// Parameters walk-forward may re-optimize. Empty means all defaults.
    #[serde(default)]
    pub walk_forward_params: Vec<String>,
}

impl StrategyDescriptor {
    /// Names of the parameters a walk-forward run should tune.
    pub fn tunable_params(&self) -> Vec<String> {
        if self.walk_forward_params.is_empty() {
            return self.default_params.names().map(str::to_string).collect();
        }
        self.walk_forward_params
            .iter()
            .filter(|name| self.default_params.get(name).is_some())
            .cloned()
            .collect()
    }
}

/// One or more requested strategy keys are not in the catalog.
#[derive(Debug, Error, PartialEq)]
#[error("unknown strategy keys: {}", .0.join(", "))]
pub struct UnknownStrategies(pub Vec<String>);

/// Registry of strategies by key.
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    strategies: BTreeMap<String, StrategyDescriptor>,
}

impl StrategyCatalog {
    pub fn new(strategies: impl IntoIterator<Item = StrategyDescriptor>) -> Self {
        Self {
            strategies: strategies.into_iter().map(|s| (s.key.clone(), s)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&StrategyDescriptor> {
        self.strategies.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(|k| k.as_str())
    }

    /// Resolve every key, reporting all unknown keys together.
    pub fn resolve<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<StrategyDescriptor>, UnknownStrategies> {
        let mut missing = Vec::new();
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            match self.strategies.get(key.as_ref()) {
                Some(s) => found.push(s.clone()),
                None => missing.push(key.as_ref().to_string()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(UnknownStrategies(missing))
        }
    }
}

/// Which sides a strategy may trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    #[default]
    Long,
    Short,
    Both,
}

impl TradeDirection {
    pub fn allows_long(self) -> bool {
        matches!(self, TradeDirection::Long | TradeDirection::Both)
    }

    pub fn allows_short(self) -> bool {
        matches!(self, TradeDirection::Short | TradeDirection::Both)
    }
}

/// Entry filter applied on top of the strategy's own signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeFilter {
    #[default]
    None,
    /// Longs only above the long-term average, shorts only below.
    Trend,
}

macro_rules! impl_label {
    ($ty:ty { $($variant:path => $label:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let label = match self { $($variant => $label),+ };
                f.write_str(label)
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok($variant),)+
                    other => Err(format!("unknown {} '{other}'", stringify!($ty))),
                }
            }
        }
    };
}

impl_label!(TradeDirection {
    TradeDirection::Long => "long",
    TradeDirection::Short => "short",
    TradeDirection::Both => "both",
});

impl_label!(TradeFilter {
    TradeFilter::None => "none",
    TradeFilter::Trend => "trend",
});

/// Trading cost assumptions applied to every fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingCosts {
    /// Commission per side, percent of notional.
    pub commission_percent: f64,
    /// Slippage per side, basis points.
    pub slippage_bps: f64,
}

impl TradingCosts {
    /// Combined per-side cost as a fraction of notional.
    pub fn per_side_fraction(&self) -> f64 {
        self.commission_percent / 100.0 + self.slippage_bps / 10_000.0
    }
}

impl Default for TradingCosts {
    fn default() -> Self {
        Self {
            commission_percent: 0.05,
            slippage_bps: 2.0,
        }
    }
}

/// Cost and risk settings shared by every backtest of one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSettings {
    pub costs: TradingCosts,
    pub initial_capital: f64,
    pub direction: TradeDirection,
    pub filter: TradeFilter,
    /// Minimum trade count a parameter set needs to be considered at all.
    pub min_trades: usize,
    /// Bars per year, used to annualize the Sharpe ratio.
    pub periods_per_year: f64,
}

impl BacktestSettings {
    /// Same settings with a different cost assumption.
    pub fn with_costs(self, costs: TradingCosts) -> Self {
        Self { costs, ..self }
    }
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            costs: TradingCosts::default(),
            initial_capital: 10_000.0,
            direction: TradeDirection::Long,
            filter: TradeFilter::None,
            min_trades: 5,
            periods_per_year: 252.0,
        }
    }
}
