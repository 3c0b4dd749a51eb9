#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use quantlab::domain::bar::Bar;
use quantlab::domain::condition::{Condition, Param};
use quantlab::domain::error::QuantlabError;
use quantlab::domain::regime::Regime;
use quantlab::domain::strategy::{
    ConfigLayer, DirectionPolicy, PositionLayer, RiskLayer, SizingMode, StrategyConfig,
};
use quantlab::ports::bar_port::BarPort;
use quantlab::ports::strategy_port::StrategyPort;
use std::collections::HashMap;
use std::io::Write;

pub struct MockBarPort {
    pub bars: Vec<Bar>,
    pub error: Option<String>,
}

impl MockBarPort {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars, error: None }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            bars: Vec::new(),
            error: Some(reason.to_string()),
        }
    }
}

impl BarPort for MockBarPort {
    fn load_bars(&self) -> Result<Vec<Bar>, QuantlabError> {
        match &self.error {
            Some(reason) => Err(QuantlabError::DataLoad {
                reason: reason.clone(),
            }),
            None => Ok(self.bars.clone()),
        }
    }
}

pub struct MockStrategyPort {
    pub strategy: StrategyConfig,
}

impl StrategyPort for MockStrategyPort {
    fn load_strategy(&self) -> Result<StrategyConfig, QuantlabError> {
        Ok(self.strategy.clone())
    }
}

pub fn ts(hour: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(hour)
}

pub fn make_bar(hour: i64, high: f64, low: f64, close: f64, regime: Regime) -> Bar {
    Bar {
        timestamp: ts(hour),
        open: close,
        high,
        low,
        close,
        indicators: HashMap::new(),
        regime,
    }
}

/// A bar that closes at `price` with a tight range and a neutral RSI.
pub fn quiet_bar(hour: i64, price: f64, regime: Regime) -> Bar {
    make_bar(hour, price + 0.5, price - 0.5, price, regime).with_indicator("rsi", 50.0)
}

/// A quiet bar whose RSI triggers the default long entry.
pub fn entry_bar(hour: i64, price: f64, regime: Regime) -> Bar {
    make_bar(hour, price + 0.5, price - 0.5, price, regime).with_indicator("rsi", 25.0)
}

pub fn rsi_below(level: f64) -> Condition {
    Condition::Rsi {
        above: None,
        below: Some(Param::Value(level)),
    }
}

pub fn rsi_above(level: f64) -> Condition {
    Condition::Rsi {
        above: Some(Param::Value(level)),
        below: None,
    }
}

pub fn adx_above(level: f64) -> Condition {
    Condition::Adx {
        above: Some(Param::Value(level)),
        below: None,
    }
}

/// 15% of equity per trade, 1% risk, 1.5R target, long on RSI < 30.
pub fn base_layer() -> ConfigLayer {
    ConfigLayer {
        direction: Some(DirectionPolicy::Long),
        position: PositionLayer {
            mode: Some(SizingMode::EquityPct),
            equity_pct: Some(15.0),
            ..PositionLayer::default()
        },
        risk: RiskLayer {
            risk_pct: Some(Param::Value(1.0)),
            rr: Some(Param::Value(1.5)),
            trailing_stop_pct: Some(0.0),
            partial_exit: None,
        },
        entry_rules: Some(vec![rsi_below(30.0)]),
        exit_rules: Some(Vec::new()),
        ..ConfigLayer::default()
    }
}

pub fn make_strategy(base: ConfigLayer) -> StrategyConfig {
    StrategyConfig::new("test_strategy", "BTCUSDT", "1h", base)
}

pub fn write_temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
