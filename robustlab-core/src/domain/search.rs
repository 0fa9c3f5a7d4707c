//! Outputs of one seeded candidate search.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::params::StrategyParams;
use super::result::BacktestResult;

/// Decision reason recorded when no candidate survived the search.
pub const NO_PASS: &str = "no_pass";
/// Decision reason recorded when a candidate survived.
pub const PASS: &str = "pass";

/// Result of one seed's search.
///
/// `params` and `result` are both present iff `passed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedRun {
    pub seed: u64,
    pub passed: bool,
    pub robust_score: f64,
    pub pass_rate: f64,
    pub stage_c_survivors: usize,
    pub params: Option<StrategyParams>,
    pub result: Option<BacktestResult>,
    pub decision_reason: String,
}

impl SeedRun {
    /// A seed whose search found nothing.
    pub fn no_pass(seed: u64, pass_rate: f64) -> Self {
        Self {
            seed,
            passed: false,
            robust_score: 0.0,
            pass_rate,
            stage_c_survivors: 0,
            params: None,
            result: None,
            decision_reason: NO_PASS.to_string(),
        }
    }

    /// The winning params and their result, when the search passed.
    pub fn candidate(&self) -> Option<(&StrategyParams, &BacktestResult)> {
        match (self.passed, &self.params, &self.result) {
            (true, Some(params), Some(result)) => Some((params, result)),
            _ => None,
        }
    }
}

/// Structured stage statistics the search emits for every seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAudit {
    pub samples: usize,
    pub stage_a_survivors: usize,
    pub stage_b_survivors: usize,
    pub stage_c_survivors: usize,
    /// Rejection reason → number of candidates rejected for it.
    pub rejection_reasons: BTreeMap<String, usize>,
    pub top_decile_expectancy: Option<f64>,
    pub fold_stability_penalty: Option<f64>,
    pub dd_breach_rate: Option<f64>,
}

impl SearchAudit {
    pub fn reject(&mut self, reason: &str) {
        *self.rejection_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// Everything one search invocation returns.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub run: SeedRun,
    pub audit: SearchAudit,
}
