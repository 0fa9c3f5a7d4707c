//! Search ranges derived from a strategy's default parameter values.
//!
//! Every tunable parameter gets a bounded grid around its default:
//! - toggles (toggle-style name, default 0 or 1): `[0, 1]`, step 1
//! - fractional defaults (non-integer, < 1): `[max(0.1, d/2), min(1, 1.5d)]`, step >= 0.05
//! - everything else: `[max(1, floor(d/2)), ceil(2d)]`, step >= 1
//!
//! The per-parameter point count comes from a total combination budget, so the
//! full grid stays bounded no matter how many parameters are tuned.

use serde::{Deserialize, Serialize};

use crate::domain::{StrategyDescriptor, StrategyParams};

const MIN_FRACTION: f64 = 0.1;
const MAX_FRACTION: f64 = 1.0;
const MIN_FRACTION_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeKind {
    Toggle,
    Fractional,
    Integer,
}

/// Inclusive grid `[min, max]` walked in `step` increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamRange {
    pub name: String,
    pub kind: RangeKind,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamRange {
    /// All grid values from `min` up to `max`.
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::new();
        if self.step <= 0.0 || self.max < self.min {
            values.push(self.min);
            return values;
        }
        let mut i = 0u32;
        loop {
            let v = round6(self.min + f64::from(i) * self.step);
            if v > self.max + 1e-9 {
                break;
            }
            values.push(v);
            i += 1;
        }
        values
    }
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Whether `name` follows the on/off toggle naming convention.
pub fn is_toggle_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("use_")
        || lower.starts_with("enable")
        || lower.starts_with("is_")
        || lower.ends_with("_enabled")
        || lower.ends_with("_toggle")
}

/// `max(2, floor(budget^(1/k)))`, with `budget` clamped to at least 1.
pub fn steps_per_param(combination_budget: usize, tunable_count: usize) -> usize {
    if tunable_count == 0 {
        return 2;
    }
    let target = combination_budget.max(1) as f64;
    // Nudge before flooring so exact roots (64^(1/3)) are not lost to rounding.
    let root = target.powf(1.0 / tunable_count as f64) + 1e-9;
    (root.floor() as usize).max(2)
}

/// Derive the search range for one parameter from its default value.
pub fn derive_range(name: &str, default: f64, steps: usize) -> ParamRange {
    let intervals = steps.max(2) as f64 - 1.0;
    let is_integer = default.fract() == 0.0;

    if is_toggle_name(name) && (default == 0.0 || default == 1.0) {
        return ParamRange {
            name: name.to_string(),
            kind: RangeKind::Toggle,
            min: 0.0,
            max: 1.0,
            step: 1.0,
        };
    }

    if !is_integer && default < 1.0 {
        let min = (0.5 * default).max(MIN_FRACTION);
        let max = (1.5 * default).min(MAX_FRACTION).max(min);
        let step = ((max - min) / intervals).max(MIN_FRACTION_STEP);
        return ParamRange {
            name: name.to_string(),
            kind: RangeKind::Fractional,
            min: round6(min),
            max: round6(max),
            step: round6(step),
        };
    }

    let min = (0.5 * default).floor().max(1.0);
    let max = (2.0 * default).ceil().max(min);
    let step = ((max - min) / intervals).ceil().max(1.0);
    ParamRange {
        name: name.to_string(),
        kind: RangeKind::Integer,
        min,
        max,
        step,
    }
}

/// Ranges for the strategy's tunable parameters under a combination budget.
pub fn derive_ranges(strategy: &StrategyDescriptor, combination_budget: usize) -> Vec<ParamRange> {
    let tunable = strategy.tunable_params();
    let steps = steps_per_param(combination_budget, tunable.len());
    ranges_with_steps(&strategy.default_params, &tunable, steps)
}

/// Ranges for `names` with a fixed per-parameter point count.
pub fn ranges_with_steps(defaults: &StrategyParams, names: &[String], steps: usize) -> Vec<ParamRange> {
    names
        .iter()
        .filter_map(|name| defaults.get(name).map(|d| derive_range(name, d, steps)))
        .collect()
}

/// Number of combinations `expand_grid` would produce.
pub fn grid_size(ranges: &[ParamRange]) -> usize {
    ranges.iter().map(|r| r.values().len()).product()
}

/// Cartesian product of `ranges` over `base`; parameters without a range keep their base value.
pub fn expand_grid(base: &StrategyParams, ranges: &[ParamRange]) -> Vec<StrategyParams> {
    let mut grid = vec![base.clone()];
    for range in ranges {
        let values = range.values();
        grid = grid
            .iter()
            .flat_map(|params| values.iter().map(move |&v| params.with(&range.name, v)))
            .collect();
    }
    grid
}
