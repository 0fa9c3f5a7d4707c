//! Per-seed audit events emitted while the pipeline runs.
//!
//! The finder hands its stage statistics back as a [`SearchAudit`]; the
//! pipeline wraps them with the cell key and pushes them into an
//! [`AuditSink`]. [`FileAuditSink`] writes the marker-line format that the
//! log-text adapter reads back, so pipeline output feeds the aggregator as is.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use robustlab_core::domain::{SearchAudit, SearchOutcome};

use super::record::{DECISION_FAIL, DECISION_PASS};
use super::AuditError;

/// Prefix of every audit line in `audit.log`.
pub const AUDIT_MARKER: &str = "[Finder][robust_random_wf][cell_audit]";
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// One seed's audit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub strategy_key: String,
    pub timeframe: String,
    pub seed: u64,
    /// Pipeline stage that ran the search (`oos_train`, `fee_slippage`).
    pub phase: String,
    pub decision: String,
    pub decision_reason: String,
    pub pass_rate: f64,
    pub robust_score: f64,
    #[serde(flatten)]
    pub audit: SearchAudit,
}

pub trait AuditSink {
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends marker lines to a file, one per event.
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    file: File,
}

impl FileAuditSink {
    /// Open `path` for appending, or truncate it first when `fresh`.
    pub fn open(path: &Path, fresh: bool) -> Result<Self, AuditError> {
        let io_err = |source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut options = OpenOptions::new();
        if fresh {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true).create(true);
        }
        let file = options.open(path).map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        writeln!(self.file, "{AUDIT_MARKER} {json}")
            .and_then(|_| self.file.flush())
            .map_err(|source| AuditError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<AuditEvent>,
}

impl AuditSink for MemorySink {
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn record(&mut self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Sink bound to one `(strategyKey, timeframe)` cell.
pub struct CellAudit<'a> {
    sink: &'a mut dyn AuditSink,
    strategy_key: String,
    timeframe: String,
}

impl<'a> CellAudit<'a> {
    pub fn new(sink: &'a mut dyn AuditSink, strategy_key: &str, timeframe: &str) -> Self {
        Self {
            sink,
            strategy_key: strategy_key.to_string(),
            timeframe: timeframe.to_string(),
        }
    }

    pub fn emit(&mut self, phase: &str, outcome: &SearchOutcome) -> Result<(), AuditError> {
        let run = &outcome.run;
        let event = AuditEvent {
            strategy_key: self.strategy_key.clone(),
            timeframe: self.timeframe.clone(),
            seed: run.seed,
            phase: phase.to_string(),
            decision: if run.passed { DECISION_PASS } else { DECISION_FAIL }.to_string(),
            decision_reason: run.decision_reason.clone(),
            pass_rate: run.pass_rate,
            robust_score: run.robust_score,
            audit: outcome.audit.clone(),
        };
        self.sink.record(&event)
    }
}
