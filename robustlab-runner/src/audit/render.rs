//! Table, JSON and CSV renderings of an [`AuditSummary`].

use std::fmt::{self, Write as _};
use std::path::Path;
use std::str::FromStr;

use super::summary::{AuditSummary, CellSummary};
use super::AuditError;
use crate::report::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" | "text" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Whether an output file was written or an existing one kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Reused,
}

pub fn render(summary: &AuditSummary, format: OutputFormat) -> Result<String, AuditError> {
    match format {
        OutputFormat::Table => Ok(render_table(summary)),
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(summary)?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Csv => render_csv(summary),
    }
}

/// Write rendered output unless the file exists and `force` is off.
pub fn write_output(path: &Path, content: &str, force: bool) -> Result<WriteOutcome, AuditError> {
    if path.exists() && !force {
        return Ok(WriteOutcome::Reused);
    }
    write_atomic(path, content.as_bytes()).map_err(|source| AuditError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(WriteOutcome::Written)
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "-".to_string())
}

fn stage(cell: &CellSummary, bucket: &str) -> usize {
    cell.reasons.reject_reasons_by_stage.get(bucket).copied().unwrap_or(0)
}

fn render_table(summary: &AuditSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<9} {:>5} {:>6} {:>8} {:>10} {:>9}  {:<10} {:<28} {:<28}",
        "strategy", "timeframe", "runs", "passes", "passRate", "medRobust", "medStageC", "decision", "topFail", "topReject"
    );
    for cell in &summary.cells {
        let _ = writeln!(
            out,
            "{:<20} {:<9} {:>5} {:>6} {:>8.3} {:>10} {:>9}  {:<10} {:<28} {:<28}",
            cell.strategy_key,
            cell.timeframe,
            cell.runs,
            cell.pass_count,
            cell.seed_pass_rate,
            opt(cell.median_robust_score),
            opt(cell.median_stage_c_survivors),
            cell.decision.label(),
            cell.reasons.top_fail_reason.as_deref().unwrap_or("-"),
            cell.reasons.top_reject_reason.as_deref().unwrap_or("-"),
        );
    }

    let g = &summary.global;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "records={} passes={} cells={} go={} near_miss={} no_go={}",
        g.total_records, g.pass_count, g.cells, g.go_cells, g.near_miss_cells, g.no_go_cells
    );
    let _ = writeln!(
        out,
        "missing_seed={} dropped={} malformed={} other_phase={} duplicate_seed={}",
        g.missing_seed_records, g.dropped_records, g.malformed_payloads, g.other_phase_records, g.duplicate_seed_records
    );
    let stages: Vec<String> = g
        .reasons
        .reject_reasons_by_stage
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let _ = writeln!(out, "reject_by_stage: {}", if stages.is_empty() { "-".to_string() } else { stages.join(" ") });
    let _ = writeln!(
        out,
        "top_fail={} top_reject={}",
        g.reasons.top_fail_reason.as_deref().unwrap_or("-"),
        g.reasons.top_reject_reason.as_deref().unwrap_or("-")
    );
    if !summary.warnings.is_empty() {
        let _ = writeln!(out, "warnings: {}", summary.warnings.join(", "));
    }
    out
}

const CSV_HEADER: [&str; 18] = [
    "strategyKey",
    "timeframe",
    "runs",
    "passCount",
    "seedPassRate",
    "medianCellPassRate",
    "medianRobustScore",
    "medianTopDecileExpectancy",
    "medianFoldStabilityPenalty",
    "medianDDBreachRate",
    "medianStageCSurvivors",
    "topFailReason",
    "topRejectReason",
    "rejectStageA",
    "rejectStageB",
    "rejectStageC",
    "rejectOther",
    "decision",
];

fn render_csv(summary: &AuditSummary) -> Result<String, AuditError> {
    let csv_value = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for cell in &summary.cells {
        writer.write_record([
            cell.strategy_key.clone(),
            cell.timeframe.clone(),
            cell.runs.to_string(),
            cell.pass_count.to_string(),
            cell.seed_pass_rate.to_string(),
            csv_value(cell.median_cell_pass_rate),
            csv_value(cell.median_robust_score),
            csv_value(cell.median_top_decile_expectancy),
            csv_value(cell.median_fold_stability_penalty),
            csv_value(cell.median_dd_breach_rate),
            csv_value(cell.median_stage_c_survivors),
            cell.reasons.top_fail_reason.clone().unwrap_or_default(),
            cell.reasons.top_reject_reason.clone().unwrap_or_default(),
            stage(cell, "stage_a").to_string(),
            stage(cell, "stage_b").to_string(),
            stage(cell, "stage_c").to_string(),
            stage(cell, "other").to_string(),
            cell.decision.label().to_string(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| AuditError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::summary::{aggregate, AuditPolicy};

    fn empty_summary() -> AuditSummary {
        aggregate(&[], &AuditPolicy::default()).unwrap()
    }

    #[test]
    fn format_labels_parse() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn csv_has_header_only_when_empty() {
        let out = render(&empty_summary(), OutputFormat::Csv).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("strategyKey,timeframe,runs"));
    }

    #[test]
    fn table_mentions_warnings() {
        let out = render(&empty_summary(), OutputFormat::Table).unwrap();
        assert!(out.contains("warnings: noRecords"));
    }

    #[test]
    fn existing_output_is_reused_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        assert_eq!(write_output(&path, "one", false).unwrap(), WriteOutcome::Written);
        assert_eq!(write_output(&path, "two", false).unwrap(), WriteOutcome::Reused);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");
        assert_eq!(write_output(&path, "two", true).unwrap(), WriteOutcome::Written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
