//! Audit input sources and their adapters into [`AuditRecord`]s.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use super::record::{AuditRecord, DECISION_PASS};
use super::sink::AUDIT_MARKER;
use super::AuditError;

/// Decision reason given to rows that only appear in a top-results export.
pub const INFERRED_FROM_TOP_RESULTS: &str = "inferred_from_top_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceKind {
    /// Free text with marker lines followed by a JSON object.
    LogText,
    /// JSON array of passing rows.
    TopResults,
    /// JSON array/object of audit payloads.
    Structured,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::LogText => "log",
            SourceKind::TopResults => "top_results",
            SourceKind::Structured => "structured",
        })
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log_text" | "text" => Ok(SourceKind::LogText),
            "top" | "top_results" | "topresults" => Ok(SourceKind::TopResults),
            "structured" | "json" => Ok(SourceKind::Structured),
            other => Err(format!("unknown audit source kind '{other}'")),
        }
    }
}

/// A parsed audit input.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditSource {
    LogText(String),
    TopResults(Vec<Value>),
    Structured(Vec<Value>),
}

/// Records extracted from one source plus what had to be skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<AuditRecord>,
    /// Payloads without a strategy key or timeframe.
    pub dropped_records: usize,
    /// Marker lines or entries whose payload was not a JSON object.
    pub malformed_payloads: usize,
    pub inferred_from_top_results: bool,
}

impl AuditSource {
    /// Guess the kind of `content` without a hint.
    ///
    /// Non-JSON text is a log. A JSON array is structured when its first
    /// object carries a decision or stage fields, otherwise top results.
    pub fn detect(content: &str) -> SourceKind {
        let Ok(value) = serde_json::from_str::<Value>(content) else {
            return SourceKind::LogText;
        };
        match value {
            Value::Array(items) => {
                let looks_structured = items.iter().find_map(Value::as_object).is_some_and(|first| {
                    ["decision", "decisionReason", "decision_reason", "stageASurvivors", "rejectionReasons"]
                        .iter()
                        .any(|k| first.contains_key(*k))
                });
                if looks_structured || items.is_empty() {
                    SourceKind::Structured
                } else {
                    SourceKind::TopResults
                }
            }
            Value::Object(_) => SourceKind::Structured,
            _ => SourceKind::LogText,
        }
    }

    pub fn parse(kind: SourceKind, content: &str) -> Result<Self, AuditError> {
        match kind {
            SourceKind::LogText => Ok(AuditSource::LogText(content.to_string())),
            SourceKind::TopResults => match serde_json::from_str(content)? {
                Value::Array(items) => Ok(AuditSource::TopResults(items)),
                other => Ok(AuditSource::TopResults(vec![other])),
            },
            SourceKind::Structured => Ok(AuditSource::Structured(unwrap_structured(
                serde_json::from_str(content)?,
            ))),
        }
    }

    /// Read a file, detecting its kind when none is given.
    pub fn from_path(path: &Path, kind: Option<SourceKind>) -> Result<Self, AuditError> {
        let content = fs::read_to_string(path).map_err(|source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = kind.unwrap_or_else(|| Self::detect(&content));
        debug!(path = %path.display(), %kind, "reading audit source");
        Self::parse(kind, &content)
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            AuditSource::LogText(_) => SourceKind::LogText,
            AuditSource::TopResults(_) => SourceKind::TopResults,
            AuditSource::Structured(_) => SourceKind::Structured,
        }
    }

    pub fn extract(&self) -> Extraction {
        match self {
            AuditSource::LogText(text) => extract_log(text),
            AuditSource::TopResults(rows) => extract_top_results(rows),
            AuditSource::Structured(items) => extract_payloads(items.iter()),
        }
    }
}

/// `{records: [...]}` / `{audits: [...]}` unwrap to their arrays; a lone object is one payload.
fn unwrap_structured(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match ["records", "audits"]
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }) {
            Some(items) => items,
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

fn push_payload(out: &mut Extraction, payload: &Map<String, Value>) {
    match AuditRecord::from_payload(payload) {
        Some(record) => out.records.push(record),
        None => out.dropped_records += 1,
    }
}

fn extract_payloads<'a>(items: impl Iterator<Item = &'a Value>) -> Extraction {
    let mut out = Extraction::default();
    for item in items {
        match item.as_object() {
            Some(payload) => push_payload(&mut out, payload),
            None => out.malformed_payloads += 1,
        }
    }
    out
}

fn extract_log(text: &str) -> Extraction {
    let mut out = Extraction::default();
    for line in text.lines() {
        let Some(at) = line.find(AUDIT_MARKER) else {
            continue;
        };
        let rest = &line[at + AUDIT_MARKER.len()..];
        let payload = rest.find('{').and_then(|start| {
            // Trailing text after the object is ignored.
            serde_json::Deserializer::from_str(&rest[start..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        });
        match payload {
            Some(Value::Object(map)) => push_payload(&mut out, &map),
            _ => out.malformed_payloads += 1,
        }
    }
    out
}

fn extract_top_results(rows: &[Value]) -> Extraction {
    let mut out = Extraction::default();
    for row in rows {
        let Some(map) = row.as_object() else {
            out.malformed_payloads += 1;
            continue;
        };
        let mut map = map.clone();
        map.insert("decision".into(), Value::String(DECISION_PASS.into()));
        map.insert("decisionReason".into(), Value::String(INFERRED_FROM_TOP_RESULTS.into()));
        push_payload(&mut out, &map);
    }
    out.inferred_from_top_results = !out.records.is_empty();
    out
}
