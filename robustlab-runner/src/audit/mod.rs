//! Audit events and the audit-log aggregator.
//!
//! - [`sink`]: per-seed events written by the pipeline
//! - [`source`]: input kinds (log text, top results, structured JSON) and their adapters
//! - [`record`]: the normalized record every adapter produces
//! - [`summary`]: per-cell and global statistics with go/no-go decisions
//! - [`render`]: table, JSON and CSV output

pub mod record;
pub mod render;
pub mod sink;
pub mod source;
pub mod summary;

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

pub use record::{AuditRecord, DECISION_FAIL, DECISION_PASS};
pub use render::{render, write_output, OutputFormat, WriteOutcome};
pub use sink::{AuditEvent, AuditSink, CellAudit, FileAuditSink, MemorySink, NullSink, AUDIT_LOG_FILE, AUDIT_MARKER};
pub use source::{AuditSource, Extraction, SourceKind, INFERRED_FROM_TOP_RESULTS};
pub use summary::{aggregate, AuditPolicy, AuditSummary, CellDecision, CellSummary, GlobalSummary};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("audit JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid audit policy: {0}")]
    InvalidPolicy(String),
}

/// One input file, with its kind when the caller knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditInput {
    pub path: PathBuf,
    pub kind: Option<SourceKind>,
}

/// Read, adapt and aggregate every input in order.
pub fn summarize_files(inputs: &[AuditInput], policy: &AuditPolicy) -> Result<AuditSummary, AuditError> {
    policy.validate()?;
    let mut extractions = Vec::with_capacity(inputs.len());
    for input in inputs {
        let source = AuditSource::from_path(&input.path, input.kind)?;
        let extraction = source.extract();
        info!(
            path = %input.path.display(),
            kind = %source.kind(),
            records = extraction.records.len(),
            dropped = extraction.dropped_records,
            malformed = extraction.malformed_payloads,
            "audit source loaded"
        );
        extractions.push((input.path.display().to_string(), source.kind(), extraction));
    }
    aggregate(&extractions, policy)
}
