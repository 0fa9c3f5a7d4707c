//! StrategyParams: an immutable, ordered name → value mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("parameter '{name}' is not a finite number ({value})")]
    NonFinite { name: String, value: f64 },
}

/// Strategy parameter set.
///
/// Values are always finite. Once built the set is read-only: searches produce
/// new sets, engines only read them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct StrategyParams(BTreeMap<String, f64>);

impl StrategyParams {
    pub fn try_from_map(map: BTreeMap<String, f64>) -> Result<Self, ParamsError> {
        for (name, value) in &map {
            if !value.is_finite() {
                return Err(ParamsError::NonFinite {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        Ok(Self(map))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Value of `name`, or `fallback` when absent.
    pub fn get_or(&self, name: &str, fallback: f64) -> f64 {
        self.get(name).unwrap_or(fallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy with `name` set to `value`. Non-finite values are ignored.
    pub fn with(&self, name: &str, value: f64) -> Self {
        let mut map = self.0.clone();
        if value.is_finite() {
            map.insert(name.to_string(), value);
        }
        Self(map)
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

impl TryFrom<BTreeMap<String, f64>> for StrategyParams {
    type Error = ParamsError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        Self::try_from_map(map)
    }
}

impl From<StrategyParams> for BTreeMap<String, f64> {
    fn from(params: StrategyParams) -> Self {
        params.0
    }
}

/// Collects `(name, value)` pairs, silently skipping non-finite values.
impl<S: Into<String>> FromIterator<(S, f64)> for StrategyParams {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v))
                .filter(|(_, v)| v.is_finite())
                .collect(),
        )
    }
}
