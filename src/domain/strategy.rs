//! Strategy definition: a base block plus partial per-regime overrides.
//!
//! Every leaf is optional so the same [`ConfigLayer`] type describes the
//! engine defaults, the strategy base and each regime override. The config
//! resolver merges them leaf by leaf.

use crate::domain::condition::{Condition, Param};
use crate::domain::regime::Regime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    #[default]
    Long,
    Short,
    Both,
}

impl FromStr for DirectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(DirectionPolicy::Long),
            "short" => Ok(DirectionPolicy::Short),
            "both" => Ok(DirectionPolicy::Both),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    EquityPct,
    FixedSize,
    Atr,
}

impl SizingMode {
    /// Dotted name of the size field this mode requires.
    pub fn size_field(&self) -> &'static str {
        match self {
            SizingMode::EquityPct => "position.equity_pct",
            SizingMode::FixedSize => "position.fixed_size",
            SizingMode::Atr => "position.atr_multiplier",
        }
    }
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SizingMode::EquityPct => "equity_pct",
            SizingMode::FixedSize => "fixed_size",
            SizingMode::Atr => "atr",
        })
    }
}

impl FromStr for SizingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity_pct" => Ok(SizingMode::EquityPct),
            "fixed_size" => Ok(SizingMode::FixedSize),
            "atr" => Ok(SizingMode::Atr),
            other => Err(format!("unknown sizing mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SizingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atr_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_pct: Option<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rr: Option<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_pct: Option<f64>,
    /// Fraction of the position closed at the first target hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_exit: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeesLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_fee_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker_fee_pct: Option<f64>,
}

/// One layer of configuration. Rule lists are leaves: a present list replaces
/// the lower layer's list as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<DirectionPolicy>,
    #[serde(default)]
    pub position: PositionLayer,
    #[serde(default)]
    pub risk: RiskLayer,
    #[serde(default)]
    pub fees: FeesLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_rules: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_rules: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Condition>>,
}

impl ConfigLayer {
    /// Present rule lists with their names, in document order.
    pub fn rule_lists(&self) -> Vec<(&'static str, &[Condition])> {
        [
            ("entry_rules", &self.entry_rules),
            ("exit_rules", &self.exit_rules),
            ("filters", &self.filters),
        ]
        .into_iter()
        .filter_map(|(name, list)| list.as_deref().map(|l| (name, l)))
        .collect()
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub symbol: String,
    pub timeframe: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub base: ConfigLayer,
    #[serde(default)]
    pub regime_overrides: BTreeMap<Regime, ConfigLayer>,
}

impl StrategyConfig {
    pub fn new(name: &str, symbol: &str, timeframe: &str, base: ConfigLayer) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            enabled: true,
            base,
            regime_overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, regime: Regime, layer: ConfigLayer) -> Self {
        self.regime_overrides.insert(regime, layer);
        self
    }

    pub fn override_for(&self, regime: Regime) -> Option<&ConfigLayer> {
        self.regime_overrides.get(&regime)
    }

    /// Every rule list in the strategy, keyed by its document path
    /// (`base.entry_rules`, `regime_overrides.ranging.filters`, ...).
    pub fn rule_locations(&self) -> Vec<(String, &[Condition])> {
        let mut out: Vec<(String, &[Condition])> = self
            .base
            .rule_lists()
            .into_iter()
            .map(|(name, list)| (format!("base.{name}"), list))
            .collect();
        for (regime, layer) in &self.regime_overrides {
            for (name, list) in layer.rule_lists() {
                out.push((format!("regime_overrides.{regime}.{name}"), list));
            }
        }
        out
    }
}
