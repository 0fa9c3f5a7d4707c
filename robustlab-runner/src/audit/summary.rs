//! Per-cell and global aggregation of audit records.
//!
//! Cells are keyed by `(strategyKey, timeframe)` and kept in key order, and
//! every histogram is an ordered map, so the same inputs always produce the
//! same summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use robustlab_core::stats::{median_of_present, mode};

use super::record::AuditRecord;
use crate::fee_slippage::PHASE_FEE_SLIPPAGE;
use super::source::{Extraction, SourceKind};
use super::AuditError;

pub const WARN_INFERRED_FROM_TOP_RESULTS: &str = "inferredFromTopResults";
pub const WARN_MISSING_SEED_RECORDS: &str = "missingSeedRecords";
pub const WARN_DROPPED_RECORDS: &str = "droppedRecords";
pub const WARN_MALFORMED_PAYLOADS: &str = "malformedPayloads";
pub const WARN_NO_RECORDS: &str = "noRecords";
pub const WARN_DUPLICATE_SEED_RECORDS: &str = "duplicateSeedRecords";

/// Go/no-go thresholds for a cell, and which pipeline phase a cell counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AuditPolicy {
    pub min_seed_runs: usize,
    pub min_seed_passes: usize,
    /// How many passes short of `min_seed_passes` still counts as a near miss.
    pub near_miss_margin: usize,
    /// Records tagged with another phase are set aside; records without a
    /// phase always count. Empty counts every phase.
    pub phase: String,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            min_seed_runs: 3,
            min_seed_passes: 2,
            near_miss_margin: 1,
            phase: PHASE_FEE_SLIPPAGE.to_string(),
        }
    }
}

impl AuditPolicy {
    pub fn counts_phase(&self, phase: Option<&str>) -> bool {
        match phase {
            Some(p) => self.phase.is_empty() || p == self.phase,
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.min_seed_passes > self.min_seed_runs {
            return Err(AuditError::InvalidPolicy(format!(
                "min seed passes ({}) exceeds min seed runs ({})",
                self.min_seed_passes, self.min_seed_runs
            )));
        }
        Ok(())
    }

    pub fn decide(&self, runs: usize, pass_count: usize) -> CellDecision {
        if runs < self.min_seed_runs {
            CellDecision::NoGo
        } else if pass_count >= self.min_seed_passes {
            CellDecision::Go
        } else if pass_count + self.near_miss_margin >= self.min_seed_passes {
            CellDecision::NearMiss
        } else {
            CellDecision::NoGo
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellDecision {
    Go,
    NearMiss,
    NoGo,
}

impl CellDecision {
    pub fn label(self) -> &'static str {
        match self {
            CellDecision::Go => "GO",
            CellDecision::NearMiss => "NEAR_MISS",
            CellDecision::NoGo => "NO_GO",
        }
    }
}

/// Fail and reject reason histograms with their modes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonHistograms {
    /// `decisionReason` counts over non-PASS records.
    pub fail_reasons: BTreeMap<String, usize>,
    /// Summed finder rejection counts.
    pub reject_reasons: BTreeMap<String, usize>,
    /// Rejection counts bucketed into `stage_a`, `stage_b`, `stage_c`, `other`.
    pub reject_reasons_by_stage: BTreeMap<String, usize>,
    pub top_fail_reason: Option<String>,
    pub top_reject_reason: Option<String>,
}

impl ReasonHistograms {
    fn add(&mut self, record: &AuditRecord) {
        if !record.is_pass() {
            *self.fail_reasons.entry(record.decision_reason.clone()).or_insert(0) += 1;
        }
        for (reason, &count) in &record.rejection_reasons {
            *self.reject_reasons.entry(reason.clone()).or_insert(0) += count;
            *self
                .reject_reasons_by_stage
                .entry(stage_bucket(reason).to_string())
                .or_insert(0) += count;
        }
    }

    fn finish(&mut self) {
        self.top_fail_reason = mode(&self.fail_reasons);
        self.top_reject_reason = mode(&self.reject_reasons);
    }
}

pub fn stage_bucket(reason: &str) -> &'static str {
    if reason.starts_with("stage_a") {
        "stage_a"
    } else if reason.starts_with("stage_b") {
        "stage_b"
    } else if reason.starts_with("stage_c") {
        "stage_c"
    } else {
        "other"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSummary {
    pub strategy_key: String,
    pub timeframe: String,
    pub runs: usize,
    pub pass_count: usize,
    pub seed_pass_rate: f64,
    pub missing_seed_records: usize,
    pub median_cell_pass_rate: Option<f64>,
    pub median_robust_score: Option<f64>,
    pub median_top_decile_expectancy: Option<f64>,
    pub median_fold_stability_penalty: Option<f64>,
    #[serde(rename = "medianDDBreachRate")]
    pub median_dd_breach_rate: Option<f64>,
    pub median_stage_c_survivors: Option<f64>,
    #[serde(flatten)]
    pub reasons: ReasonHistograms,
    pub decision: CellDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub label: String,
    pub kind: String,
    pub records: usize,
    pub dropped_records: usize,
    pub malformed_payloads: usize,
    pub other_phase_records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummary {
    pub total_records: usize,
    pub pass_count: usize,
    pub cells: usize,
    pub go_cells: usize,
    pub near_miss_cells: usize,
    pub no_go_cells: usize,
    pub missing_seed_records: usize,
    pub dropped_records: usize,
    pub malformed_payloads: usize,
    pub other_phase_records: usize,
    /// Later records that replaced an earlier one for the same seed and phase.
    pub duplicate_seed_records: usize,
    #[serde(flatten)]
    pub reasons: ReasonHistograms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub policy: AuditPolicy,
    pub sources: Vec<SourceSummary>,
    pub cells: Vec<CellSummary>,
    pub global: GlobalSummary,
    pub warnings: Vec<String>,
}

/// Aggregate labeled extractions into one summary.
pub fn aggregate(inputs: &[(String, SourceKind, Extraction)], policy: &AuditPolicy) -> Result<AuditSummary, AuditError> {
    policy.validate()?;

    let mut sources = Vec::with_capacity(inputs.len());
    let mut grouped: BTreeMap<(String, String), Vec<&AuditRecord>> = BTreeMap::new();
    // (strategyKey, timeframe, seed, phase) -> slot in the cell's record list
    let mut slots: BTreeMap<(String, String, u64, Option<String>), usize> = BTreeMap::new();
    let mut global = GlobalSummary::default();
    let mut inferred = false;

    for (label, kind, extraction) in inputs {
        let other_phase = extraction
            .records
            .iter()
            .filter(|r| !policy.counts_phase(r.phase.as_deref()))
            .count();
        sources.push(SourceSummary {
            label: label.clone(),
            kind: kind.to_string(),
            records: extraction.records.len(),
            dropped_records: extraction.dropped_records,
            malformed_payloads: extraction.malformed_payloads,
            other_phase_records: other_phase,
        });
        global.dropped_records += extraction.dropped_records;
        global.malformed_payloads += extraction.malformed_payloads;
        global.other_phase_records += other_phase;
        inferred |= extraction.inferred_from_top_results;

        for record in extraction.records.iter().filter(|r| policy.counts_phase(r.phase.as_deref())) {
            let cell_key = (record.strategy_key.clone(), record.timeframe.clone());
            let cell = grouped.entry(cell_key).or_default();
            let Some(seed) = record.seed else {
                cell.push(record);
                continue;
            };
            let slot_key = (record.strategy_key.clone(), record.timeframe.clone(), seed, record.phase.clone());
            match slots.get(&slot_key) {
                Some(&i) => {
                    cell[i] = record;
                    global.duplicate_seed_records += 1;
                }
                None => {
                    slots.insert(slot_key, cell.len());
                    cell.push(record);
                }
            }
        }
    }

    for record in grouped.values().flatten() {
        global.total_records += 1;
        if record.is_pass() {
            global.pass_count += 1;
        }
        if record.seed.is_none() {
            global.missing_seed_records += 1;
        }
        global.reasons.add(record);
    }
    global.reasons.finish();

    let cells: Vec<CellSummary> = grouped
        .into_iter()
        .map(|((strategy_key, timeframe), records)| summarize_cell(strategy_key, timeframe, &records, policy))
        .collect();

    global.cells = cells.len();
    for cell in &cells {
        match cell.decision {
            CellDecision::Go => global.go_cells += 1,
            CellDecision::NearMiss => global.near_miss_cells += 1,
            CellDecision::NoGo => global.no_go_cells += 1,
        }
    }

    let mut warnings = Vec::new();
    if global.total_records == 0 {
        warnings.push(WARN_NO_RECORDS.to_string());
    }
    if inferred {
        warnings.push(WARN_INFERRED_FROM_TOP_RESULTS.to_string());
    }
    if global.missing_seed_records > 0 {
        warnings.push(WARN_MISSING_SEED_RECORDS.to_string());
    }
    if global.dropped_records > 0 {
        warnings.push(WARN_DROPPED_RECORDS.to_string());
    }
    if global.malformed_payloads > 0 {
        warnings.push(WARN_MALFORMED_PAYLOADS.to_string());
    }
    if global.duplicate_seed_records > 0 {
        warnings.push(WARN_DUPLICATE_SEED_RECORDS.to_string());
    }

    Ok(AuditSummary {
        policy: policy.clone(),
        sources,
        cells,
        global,
        warnings,
    })
}

fn summarize_cell(strategy_key: String, timeframe: String, records: &[&AuditRecord], policy: &AuditPolicy) -> CellSummary {
    let runs = records.len();
    let pass_count = records.iter().filter(|r| r.is_pass()).count();
    let mut reasons = ReasonHistograms::default();
    for record in records {
        reasons.add(record);
    }
    reasons.finish();

    let median_of = |f: fn(&AuditRecord) -> Option<f64>| median_of_present(records.iter().map(|r| f(r)));

    CellSummary {
        strategy_key,
        timeframe,
        runs,
        pass_count,
        seed_pass_rate: if runs == 0 { 0.0 } else { pass_count as f64 / runs as f64 },
        missing_seed_records: records.iter().filter(|r| r.seed.is_none()).count(),
        median_cell_pass_rate: median_of(|r| r.pass_rate),
        median_robust_score: median_of(|r| r.robust_score),
        median_top_decile_expectancy: median_of(|r| r.top_decile_expectancy),
        median_fold_stability_penalty: median_of(|r| r.fold_stability_penalty),
        median_dd_breach_rate: median_of(|r| r.dd_breach_rate),
        median_stage_c_survivors: median_of(|r| r.stage_c_survivors.map(|n| n as f64)),
        reasons,
        decision: policy.decide(runs, pass_count),
    }
}
