//! Bar representation: OHLC, precomputed indicators and the regime label.

use crate::domain::error::QuantlabError;
use crate::domain::regime::Regime;
use chrono::NaiveDateTime;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub indicators: HashMap<String, f64>,
    pub regime: Regime,
}

impl Bar {
    /// Looks up a precomputed indicator. NaN counts as missing (warm-up rows).
    pub fn indicator(&self, name: &str) -> Result<f64, QuantlabError> {
        match self.indicators.get(name) {
            Some(v) if v.is_finite() => Ok(*v),
            _ => Err(QuantlabError::IndicatorMissing {
                indicator: name.to_string(),
            }),
        }
    }

    pub fn has_indicator(&self, name: &str) -> bool {
        self.indicator(name).is_ok()
    }

    pub fn with_indicator(mut self, name: &str, value: f64) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }
}

/// Fails with `UnorderedBars` at the first timestamp that does not strictly increase.
pub fn ensure_ordered(bars: &[Bar]) -> Result<(), QuantlabError> {
    for (i, w) in bars.windows(2).enumerate() {
        if w[1].timestamp <= w[0].timestamp {
            return Err(QuantlabError::UnorderedBars { index: i + 1 });
        }
    }
    Ok(())
}

/// Fails with `InvalidBar` at the first bar whose prices are not finite and
/// positive, or whose low is above its high.
pub fn validate_bars(bars: &[Bar]) -> Result<(), QuantlabError> {
    for (index, bar) in bars.iter().enumerate() {
        let invalid = |reason: String| QuantlabError::InvalidBar {
            index,
            timestamp: bar.timestamp.to_string(),
            reason,
        };
        for (name, value) in [
            ("open", bar.open),
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{name} must be a positive price, got {value}")));
            }
        }
        if bar.low > bar.high {
            return Err(invalid(format!(
                "low {} is above high {}",
                bar.low, bar.high
            )));
        }
    }
    Ok(())
}
