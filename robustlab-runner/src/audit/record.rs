//! Normalized audit records and the field aliases accepted from payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decision label counted as a passing seed.
pub const DECISION_PASS: &str = "PASS";
pub const DECISION_FAIL: &str = "FAIL";
/// Placeholder for a missing decision or decision reason.
pub const UNKNOWN: &str = "unknown";

/// One seed-level audit entry of a `(strategyKey, timeframe)` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub strategy_key: String,
    pub timeframe: String,
    pub seed: Option<u64>,
    /// Pipeline stage that produced the record, when the payload names one.
    pub phase: Option<String>,
    pub decision: String,
    pub decision_reason: String,
    pub pass_rate: Option<f64>,
    pub robust_score: Option<f64>,
    pub top_decile_expectancy: Option<f64>,
    pub fold_stability_penalty: Option<f64>,
    pub dd_breach_rate: Option<f64>,
    pub stage_a_survivors: Option<u64>,
    pub stage_b_survivors: Option<u64>,
    pub stage_c_survivors: Option<u64>,
    pub rejection_reasons: BTreeMap<String, usize>,
}

impl AuditRecord {
    pub fn is_pass(&self) -> bool {
        self.decision == DECISION_PASS
    }

    /// Normalize a JSON payload. Returns `None` when the strategy key or timeframe is missing.
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        let strategy_key = text(payload, &["strategyKey", "strategy_key", "strategy", "key"])?;
        let timeframe = text(payload, &["timeframe", "interval", "tf", "timeFrame"])?;

        let decision = text(payload, &["decision", "verdict", "status"])
            .map(|d| d.to_ascii_uppercase())
            .or_else(|| {
                payload.get("passed").and_then(Value::as_bool).map(|p| {
                    if p {
                        DECISION_PASS.to_string()
                    } else {
                        DECISION_FAIL.to_string()
                    }
                })
            })
            .unwrap_or_else(|| UNKNOWN.to_string());

        Some(Self {
            strategy_key,
            timeframe,
            seed: count(payload, &["seed"]),
            phase: text(payload, &["phase", "stage"]),
            decision,
            decision_reason: text(payload, &["decisionReason", "decision_reason", "reason"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
            pass_rate: number(payload, &["passRate", "pass_rate", "cellPassRate"]),
            robust_score: number(payload, &["robustScore", "robust_score", "score"]),
            top_decile_expectancy: number(payload, &["topDecileExpectancy", "top_decile_expectancy"]),
            fold_stability_penalty: number(payload, &["foldStabilityPenalty", "fold_stability_penalty"]),
            dd_breach_rate: number(payload, &["ddBreachRate", "dd_breach_rate", "drawdownBreachRate"]),
            stage_a_survivors: count(payload, &["stageASurvivors", "stage_a_survivors", "stageA"]),
            stage_b_survivors: count(payload, &["stageBSurvivors", "stage_b_survivors", "stageB"]),
            stage_c_survivors: count(payload, &["stageCSurvivors", "stage_c_survivors", "stageC"]),
            rejection_reasons: reasons(payload),
        })
    }
}

fn field<'a>(payload: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|k| payload.get(*k).filter(|v| !v.is_null()))
}

fn text(payload: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    let s = match field(payload, aliases)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn number(payload: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    let v = match field(payload, aliases)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

fn count(payload: &Map<String, Value>, aliases: &[&str]) -> Option<u64> {
    let exact = match field(payload, aliases)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    exact.or_else(|| number(payload, aliases).filter(|n| *n >= 0.0).map(|n| n as u64))
}

fn reasons(payload: &Map<String, Value>) -> BTreeMap<String, usize> {
    let Some(Value::Object(map)) = field(payload, &["rejectionReasons", "rejection_reasons", "rejectReasons"])
    else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let n = v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))?;
            Some((k.clone(), n as usize))
        })
        .collect()
}
