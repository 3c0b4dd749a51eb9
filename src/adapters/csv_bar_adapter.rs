//! CSV bar adapter.
//!
//! Expected header: `timestamp,open,high,low,close,regime` followed by any
//! number of indicator columns (`rsi`, `macd`, `ema_150`, `bb_upper`, ...).
//! An empty or `NaN` indicator cell means the value is not available on that
//! bar. Rows must already be in timestamp order; the engine rejects unordered
//! input rather than sorting it.

use crate::domain::bar::Bar;
use crate::domain::error::QuantlabError;
use crate::domain::regime::Regime;
use crate::ports::bar_port::BarPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "regime"];

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

enum Source {
    File(PathBuf),
    Text(String),
}

pub struct CsvBarAdapter {
    source: Source,
}

impl CsvBarAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            source: Source::File(path),
        }
    }

    pub fn from_string(content: &str) -> Self {
        Self {
            source: Source::Text(content.to_string()),
        }
    }

    fn content(&self) -> Result<String, QuantlabError> {
        match &self.source {
            Source::File(path) => fs::read_to_string(path).map_err(|e| QuantlabError::DataLoad {
                reason: format!("failed to read {}: {}", path.display(), e),
            }),
            Source::Text(text) => Ok(text.clone()),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_price(record: &csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<f64, QuantlabError> {
    let raw = record.get(idx).unwrap_or("").trim();
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(QuantlabError::DataLoad {
            reason: format!("row {row}: invalid {name} value '{raw}'"),
        }),
    }
}

impl BarPort for CsvBarAdapter {
    fn load_bars(&self) -> Result<Vec<Bar>, QuantlabError> {
        let content = self.content()?;
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = rdr
            .headers()
            .map_err(|e| QuantlabError::DataLoad {
                reason: format!("CSV header error: {}", e),
            })?
            .clone();

        let mut positions = [0usize; 6];
        for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(column))
                .ok_or_else(|| QuantlabError::DataLoad {
                    reason: format!("missing {column} column"),
                })?;
        }
        let [ts_idx, open_idx, high_idx, low_idx, close_idx, regime_idx] = positions;

        let indicator_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !positions.contains(i))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut bars = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            // Header is line 1.
            let row = i + 2;
            let record = result.map_err(|e| QuantlabError::DataLoad {
                reason: format!("row {row}: CSV parse error: {}", e),
            })?;

            let raw_ts = record.get(ts_idx).unwrap_or("");
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| QuantlabError::DataLoad {
                reason: format!("row {row}: invalid timestamp '{raw_ts}'"),
            })?;

            let raw_regime = record.get(regime_idx).unwrap_or("");
            let regime: Regime = raw_regime
                .parse()
                .map_err(|e: String| QuantlabError::DataLoad {
                    reason: format!("row {row}: {e}"),
                })?;

            let mut indicators = HashMap::with_capacity(indicator_columns.len());
            for (idx, name) in &indicator_columns {
                let raw = record.get(*idx).unwrap_or("");
                if raw.is_empty() {
                    continue;
                }
                let value: f64 = raw.parse().map_err(|_| QuantlabError::DataLoad {
                    reason: format!("row {row}: invalid {name} value '{raw}'"),
                })?;
                if value.is_finite() {
                    indicators.insert(name.clone(), value);
                }
            }

            bars.push(Bar {
                timestamp,
                open: parse_price(&record, open_idx, "open", row)?,
                high: parse_price(&record, high_idx, "high", row)?,
                low: parse_price(&record, low_idx, "low", row)?,
                close: parse_price(&record, close_idx, "close", row)?,
                indicators,
                regime,
            });
        }

        tracing::debug!(bars = bars.len(), "bars loaded");
        Ok(bars)
    }
}
