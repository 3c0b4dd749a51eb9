//! Engine defaults: the lowest config layer and the sentinel values.

use crate::domain::condition::SentinelValues;
use crate::domain::config_validation::{read_f64, read_param, validate_defaults_config};
use crate::domain::error::QuantlabError;
use crate::domain::strategy::{ConfigLayer, DirectionPolicy, FeesLayer, PositionLayer, RiskLayer};
use crate::ports::config_port::ConfigPort;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Engine tuning preset. Selects the values substituted for sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl Mode {
    /// `mode_stop` is a percentage, `mode_tp` a reward-to-risk multiple and
    /// `mode_threshold` an ADX level.
    pub fn sentinels(&self) -> SentinelValues {
        match self {
            Mode::Conservative => SentinelValues {
                mode_threshold: 40.0,
                mode_stop: 2.0,
                mode_tp: 4.0,
            },
            Mode::Balanced => SentinelValues {
                mode_threshold: 30.0,
                mode_stop: 1.0,
                mode_tp: 1.5,
            },
            Mode::Aggressive => SentinelValues {
                mode_threshold: 25.0,
                mode_stop: 4.0,
                mode_tp: 4.0,
            },
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Conservative => "conservative",
            Mode::Balanced => "balanced",
            Mode::Aggressive => "aggressive",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Mode::Conservative),
            "balanced" => Ok(Mode::Balanced),
            "aggressive" => Ok(Mode::Aggressive),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Explicit engine-default input to the resolver. Never read implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultsTable {
    pub mode: Mode,
    pub sentinels: SentinelValues,
    pub layer: ConfigLayer,
}

impl Default for DefaultsTable {
    fn default() -> Self {
        Self::for_mode(Mode::default())
    }
}

impl DefaultsTable {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            mode,
            sentinels: mode.sentinels(),
            layer: ConfigLayer::default(),
        }
    }

    pub fn with_layer(mut self, layer: ConfigLayer) -> Self {
        self.layer = layer;
        self
    }

    /// Builds the table from `[engine] mode`, `[defaults]` and `[sentinels]`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantlabError> {
        validate_defaults_config(config)?;

        let mode = match config.get_string("engine", "mode") {
            Some(raw) => raw.parse::<Mode>().map_err(|reason| QuantlabError::ConfigInvalid {
                section: "engine".into(),
                key: "mode".into(),
                reason,
            })?,
            None => Mode::default(),
        };

        let mut sentinels = mode.sentinels();
        if let Some(v) = read_f64(config, "sentinels", "mode_threshold")? {
            sentinels.mode_threshold = v;
        }
        if let Some(v) = read_f64(config, "sentinels", "mode_stop")? {
            sentinels.mode_stop = v;
        }
        if let Some(v) = read_f64(config, "sentinels", "mode_tp")? {
            sentinels.mode_tp = v;
        }

        let section = "defaults";
        let layer = ConfigLayer {
            direction: config
                .get_string(section, "direction")
                .and_then(|s| s.parse::<DirectionPolicy>().ok()),
            position: PositionLayer {
                mode: config
                    .get_string(section, "sizing")
                    .and_then(|s| s.parse().ok()),
                equity_pct: read_f64(config, section, "equity_pct")?,
                fixed_size: read_f64(config, section, "fixed_size")?,
                atr_multiplier: read_f64(config, section, "atr_multiplier")?,
            },
            risk: RiskLayer {
                risk_pct: read_param(config, section, "risk_pct")?,
                rr: read_param(config, section, "rr")?,
                trailing_stop_pct: read_f64(config, section, "trailing_stop_pct")?,
                partial_exit: read_f64(config, section, "partial_exit")?,
            },
            fees: FeesLayer {
                taker_fee_pct: read_f64(config, section, "taker_fee_pct")?,
                maker_fee_pct: read_f64(config, section, "maker_fee_pct")?,
            },
            entry_rules: None,
            exit_rules: None,
            filters: None,
        };

        Ok(Self {
            mode,
            sentinels,
            layer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::condition::{Param, Sentinel};
    use crate::domain::strategy::SizingMode;

    #[test]
    fn mode_presets() {
        let c = Mode::Conservative.sentinels();
        assert!((c.mode_stop - 2.0).abs() < f64::EPSILON);
        assert!((c.mode_tp - 4.0).abs() < f64::EPSILON);
        assert!((c.mode_threshold - 40.0).abs() < f64::EPSILON);

        let a = Mode::Aggressive.sentinels();
        assert!((a.mode_threshold - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn builtin_table_has_no_sizing_defaults() {
        let table = DefaultsTable::default();
        assert_eq!(table.mode, Mode::Balanced);
        assert_eq!(table.layer, ConfigLayer::default());
        assert!((table.sentinels.mode_threshold - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_config_reads_all_sections() {
        let config = FileConfigAdapter::from_string(
            "[engine]\nmode = conservative\n\
             [defaults]\nsizing = equity_pct\nequity_pct = 15\nrisk_pct = 1.0\nrr = mode_tp\ntaker_fee_pct = 0.1\n\
             [sentinels]\nmode_threshold = 35\n",
        )
        .unwrap();
        let table = DefaultsTable::from_config(&config).unwrap();
        assert_eq!(table.mode, Mode::Conservative);
        assert!((table.sentinels.mode_threshold - 35.0).abs() < f64::EPSILON);
        assert!((table.sentinels.mode_stop - 2.0).abs() < f64::EPSILON);
        assert_eq!(table.layer.position.mode, Some(SizingMode::EquityPct));
        assert_eq!(table.layer.position.equity_pct, Some(15.0));
        assert_eq!(table.layer.risk.rr, Some(Param::Sentinel(Sentinel::ModeTp)));
        assert_eq!(table.layer.fees.taker_fee_pct, Some(0.1));
        assert_eq!(table.layer.fees.maker_fee_pct, None);
    }

    #[test]
    fn from_config_rejects_bad_mode() {
        let config = FileConfigAdapter::from_string("[engine]\nmode = yolo\n").unwrap();
        assert!(matches!(
            DefaultsTable::from_config(&config),
            Err(QuantlabError::ConfigInvalid { key, .. }) if key == "mode"
        ));
    }
}
