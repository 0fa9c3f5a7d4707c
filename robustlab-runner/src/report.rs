//! Stress report: the three section verdicts ANDed into one persisted file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use robustlab_core::domain::{BacktestSettings, TradeDirection, TradeFilter};

use crate::fee_slippage::FeeSlippageReport;
use crate::oos::OosReport;
use crate::verdict::Verdict;
use crate::walk_forward::WalkForwardReport;

/// Current schema version of `stress_report.json`.
pub const SCHEMA_VERSION: u32 = 1;
pub const REPORT_FILE: &str = "stress_report.json";

pub const SECTION_OOS: &str = "oos70_30";
pub const SECTION_WALK_FORWARD: &str = "walkForward3m1m";
pub const SECTION_FEE_SLIPPAGE: &str = "feeSlippageSensitivity";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("report JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What a report was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressInputs {
    pub dataset_path: String,
    pub dataset_name: String,
    pub symbol: Option<String>,
    pub interval: String,
    pub dataset_hash: String,
    pub bar_count: usize,
    pub dropped_rows: usize,
    pub first_bar_time: Option<i64>,
    pub last_bar_time: Option<i64>,
    pub strategy_key: String,
    pub filter: TradeFilter,
    pub direction: TradeDirection,
    pub seeds: Vec<u64>,
    pub settings: BacktestSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressReport {
    pub schema_version: u32,
    pub inputs: StressInputs,
    #[serde(rename = "oos70_30")]
    pub oos: OosReport,
    #[serde(rename = "walkForward3m1m")]
    pub walk_forward: WalkForwardReport,
    pub fee_slippage_sensitivity: FeeSlippageReport,
    pub overall: Verdict,
}

impl StressReport {
    pub fn assemble(
        inputs: StressInputs,
        oos: OosReport,
        walk_forward: WalkForwardReport,
        fee_slippage_sensitivity: FeeSlippageReport,
    ) -> Self {
        let overall = Verdict::combine([
            (SECTION_OOS, &oos.verdict),
            (SECTION_WALK_FORWARD, &walk_forward.verdict),
            (SECTION_FEE_SLIPPAGE, &fee_slippage_sensitivity.verdict),
        ]);
        Self {
            schema_version: SCHEMA_VERSION,
            inputs,
            oos,
            walk_forward,
            fee_slippage_sensitivity,
            overall,
        }
    }

    /// Write `stress_report.json` into `dir`; returns the file path.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let path = dir.join(REPORT_FILE);
        let mut json = serde_json::to_string_pretty(self).map_err(|source| ReportError::Json {
            path: path.clone(),
            source,
        })?;
        json.push('\n');
        write_atomic(&path, json.as_bytes()).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read a previously persisted report from `dir`, if there is one.
    pub fn load_existing(dir: &Path) -> Result<Option<Self>, ReportError> {
        let path = dir.join(REPORT_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ReportError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ReportError::Json { path, source })
    }
}

/// Write `bytes` to a temporary sibling and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}
