//! JSON dataset loading and normalization.
//!
//! Accepts the shapes produced by the usual exporters:
//! - a bare array of rows, or
//! - an object with optional `symbol` / `interval` and a `data`, `ohlcv` or
//!   `candles` array.
//!
//! Rows are either positional `[time, open, high, low, close, volume?]` arrays
//! or objects with flexible key aliases. Malformed rows are dropped, duplicate
//! timestamps keep the later row, and the output is sorted by time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::Bar;
use crate::stats::median;

/// Values above this are unix milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

const TIME_KEYS: &[&str] = &["time", "t", "timestamp", "date", "datetime", "start", "openTime"];
const OPEN_KEYS: &[&str] = &["open", "o"];
const HIGH_KEYS: &[&str] = &["high", "h"];
const LOW_KEYS: &[&str] = &["low", "l"];
const CLOSE_KEYS: &[&str] = &["close", "c"];
const VOLUME_KEYS: &[&str] = &["volume", "v", "vol"];
const SERIES_KEYS: &[&str] = &["data", "ohlcv", "candles"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset has no row array (expected a bare array or a data/ohlcv/candles field)")]
    NoRows,
    #[error("dataset parsed to zero valid bars ({dropped} malformed rows dropped)")]
    NoValidBars { dropped: usize },
}

/// A normalized bar series plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub name: String,
    pub symbol: Option<String>,
    /// Declared interval, or one inferred from bar spacing.
    pub interval: String,
    pub bars: Vec<Bar>,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
    /// BLAKE3 over every bar field, hex encoded.
    pub hash: String,
}

impl Dataset {
    /// Load and normalize a dataset file.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        Self::from_json_str(&name, &content)
    }

    pub fn from_json_str(name: &str, content: &str) -> Result<Self, DatasetError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(name, &value)
    }

    pub fn from_value(name: &str, value: &Value) -> Result<Self, DatasetError> {
        let (rows, symbol, interval) = match value {
            Value::Array(rows) => (rows, None, None),
            Value::Object(obj) => {
                let rows = SERIES_KEYS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_array))
                    .ok_or(DatasetError::NoRows)?;
                let symbol = obj.get("symbol").and_then(Value::as_str).map(str::to_string);
                let interval = obj.get("interval").and_then(Value::as_str).map(str::to_string);
                (rows, symbol, interval)
            }
            _ => return Err(DatasetError::NoRows),
        };

        // Keyed by time: later rows overwrite earlier ones.
        let mut by_time: BTreeMap<i64, Bar> = BTreeMap::new();
        let mut dropped = 0usize;
        let mut duplicates = 0usize;
        for row in rows {
            match parse_row(row) {
                Some(bar) => {
                    if by_time.insert(bar.time, bar).is_some() {
                        duplicates += 1;
                    }
                }
                None => dropped += 1,
            }
        }

        if by_time.is_empty() {
            return Err(DatasetError::NoValidBars { dropped });
        }
        if dropped > 0 {
            debug!(dataset = name, dropped, "dropped malformed rows");
        }

        let bars: Vec<Bar> = by_time.into_values().collect();
        let interval = interval
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| infer_interval(&bars));
        let hash = compute_bar_hash(&bars);

        Ok(Self {
            name: name.to_string(),
            symbol,
            interval,
            bars,
            dropped_rows: dropped,
            duplicate_rows: duplicates,
            hash,
        })
    }

    /// Keep only the most recent `max_bars` bars.
    pub fn trim_to_recent(&mut self, max_bars: usize) {
        if self.bars.len() > max_bars {
            let start = self.bars.len() - max_bars;
            self.bars.drain(..start);
            self.hash = compute_bar_hash(&self.bars);
        }
    }

    /// Median spacing between consecutive bars, in seconds.
    pub fn bar_spacing_seconds(&self) -> Option<f64> {
        median_spacing(&self.bars)
    }

    pub fn median_close(&self) -> Option<f64> {
        let closes: Vec<f64> = self.bars.iter().map(|b| b.close).collect();
        median(&closes)
    }
}

fn parse_row(row: &Value) -> Option<Bar> {
    let bar = match row {
        Value::Array(fields) => {
            if fields.len() < 5 {
                return None;
            }
            Bar {
                time: parse_time(&fields[0])?,
                open: parse_number(&fields[1])?,
                high: parse_number(&fields[2])?,
                low: parse_number(&fields[3])?,
                close: parse_number(&fields[4])?,
                volume: fields.get(5).and_then(parse_number).unwrap_or(0.0),
            }
        }
        Value::Object(obj) => {
            let field = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));
            Bar {
                time: parse_time(field(TIME_KEYS)?)?,
                open: parse_number(field(OPEN_KEYS)?)?,
                high: parse_number(field(HIGH_KEYS)?)?,
                low: parse_number(field(LOW_KEYS)?)?,
                close: parse_number(field(CLOSE_KEYS)?)?,
                volume: field(VOLUME_KEYS).and_then(parse_number).unwrap_or(0.0),
            }
        }
        _ => return None,
    };
    bar.is_sane().then_some(bar)
}

fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse unix seconds, unix milliseconds, or an ISO-8601 string into unix seconds.
pub fn parse_time(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => numeric_time(parse_number(value)?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return numeric_time(n);
            }
            parse_iso_time(s)
        }
        _ => None,
    }
}

fn numeric_time(n: f64) -> Option<i64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let secs = if n > MILLIS_THRESHOLD { n / 1000.0 } else { n };
    Some(secs.floor() as i64)
}

fn parse_iso_time(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

fn median_spacing(bars: &[Bar]) -> Option<f64> {
    let gaps: Vec<f64> = bars.windows(2).map(|w| (w[1].time - w[0].time) as f64).collect();
    median(&gaps)
}

/// Label a series by its median bar spacing (`1m`, `4h`, `1d`, ...).
pub fn infer_interval(bars: &[Bar]) -> String {
    let Some(spacing) = median_spacing(bars) else {
        return "unknown".to_string();
    };
    let secs = spacing.round() as i64;
    const UNITS: &[(i64, &str)] = &[(604_800, "w"), (86_400, "d"), (3_600, "h"), (60, "m")];
    for &(unit, suffix) in UNITS {
        if secs >= unit && secs % unit == 0 {
            return format!("{}{}", secs / unit, suffix);
        }
    }
    format!("{secs}s")
}

/// Deterministic BLAKE3 hash over all bar fields.
pub fn compute_bar_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(&bar.time.to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_of_positional_rows() {
        let v = json!([
            [1_700_000_000, 1.0, 2.0, 0.5, 1.5, 10],
            [1_700_003_600, 1.5, 2.5, 1.0, 2.0]
        ]);
        let ds = Dataset::from_value("x", &v).unwrap();
        assert_eq!(ds.bars.len(), 2);
        assert_eq!(ds.bars[1].volume, 0.0);
        assert_eq!(ds.interval, "1h");
    }

    #[test]
    fn object_with_aliases_and_metadata() {
        let v = json!({
            "symbol": "BTCUSDT",
            "interval": "4h",
            "candles": [
                {"openTime": 1_700_000_000_000i64, "o": "1", "h": "2", "l": "0.5", "c": "1.5", "v": 3},
                {"timestamp": "2023-11-15T02:13:20Z", "open": 1.5, "high": 2.0, "low": 1.0, "close": 1.8}
            ]
        });
        let ds = Dataset::from_value("x", &v).unwrap();
        assert_eq!(ds.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(ds.interval, "4h");
        assert_eq!(ds.bars[0].time, 1_700_000_000);
        assert_eq!(ds.bars[1].time, 1_700_014_400);
    }

    #[test]
    fn malformed_rows_dropped_and_duplicates_keep_later() {
        let v = json!({"data": [
            [100, 1.0, 2.0, 0.5, 1.5],
            [100, 1.0, 2.0, 0.5, 1.9],
            [200, "x", 2.0, 0.5, 1.5],
            [300, 1.0, 0.1, 0.5, 1.5],
            "garbage",
            [50, 1.0, 2.0, 0.5, 1.2]
        ]});
        let ds = Dataset::from_value("x", &v).unwrap();
        assert_eq!(ds.bars.len(), 2);
        assert_eq!(ds.bars[0].time, 50);
        assert_eq!(ds.bars[1].close, 1.9);
        assert_eq!(ds.dropped_rows, 3);
        assert_eq!(ds.duplicate_rows, 1);
    }

    #[test]
    fn zero_valid_bars_is_fatal() {
        let err = Dataset::from_value("x", &json!([["bad"]])).unwrap_err();
        assert!(matches!(err, DatasetError::NoValidBars { dropped: 1 }));
    }

    #[test]
    fn missing_series_is_fatal() {
        let err = Dataset::from_value("x", &json!({"rows": []})).unwrap_err();
        assert!(matches!(err, DatasetError::NoRows));
    }

    #[test]
    fn date_only_strings_are_midnight_utc() {
        assert_eq!(parse_time(&json!("2024-01-02")), Some(1_704_153_600));
        assert_eq!(parse_time(&json!("not a date")), None);
    }

    #[test]
    fn trim_keeps_most_recent_bars() {
        let rows: Vec<Value> = (0..10).map(|i| json!([i * 60, 1.0, 1.0, 1.0, 1.0])).collect();
        let mut ds = Dataset::from_value("x", &Value::Array(rows)).unwrap();
        let full_hash = ds.hash.clone();
        ds.trim_to_recent(4);
        assert_eq!(ds.bars.len(), 4);
        assert_eq!(ds.bars[0].time, 360);
        assert_ne!(ds.hash, full_hash);
    }

    #[test]
    fn hash_is_deterministic() {
        let v = json!([[1, 1.0, 2.0, 0.5, 1.5]]);
        let a = Dataset::from_value("a", &v).unwrap();
        let b = Dataset::from_value("b", &v).unwrap();
        assert_eq!(a.hash, b.hash);
    }
}
