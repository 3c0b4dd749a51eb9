//! Layered config merge: engine defaults < strategy base < regime override.
//!
//! The merge is per leaf field. Sentinels are substituted here, so an
//! [`EffectiveConfig`] only ever holds plain numbers.

use crate::domain::condition::{Condition, Param};
use crate::domain::defaults::DefaultsTable;
use crate::domain::error::QuantlabError;
use crate::domain::regime::Regime;
use crate::domain::strategy::{ConfigLayer, DirectionPolicy, SizingMode, StrategyConfig};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingParams {
    pub mode: SizingMode,
    pub equity_pct: Option<f64>,
    pub fixed_size: Option<f64>,
    pub atr_multiplier: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub strategy: String,
    pub regime: Regime,
    pub direction: DirectionPolicy,
    pub sizing: SizingParams,
    pub risk_pct: f64,
    pub rr: f64,
    pub trailing_stop_pct: Option<f64>,
    pub partial_exit: Option<f64>,
    pub taker_fee_pct: Option<f64>,
    pub maker_fee_pct: Option<f64>,
    pub entry_rules: Vec<Condition>,
    pub exit_rules: Vec<Condition>,
    pub filters: Vec<Condition>,
}

impl EffectiveConfig {
    /// Fee charged on every fill; absent fees mean zero.
    pub fn fill_fee_pct(&self) -> f64 {
        self.taker_fee_pct.unwrap_or(0.0)
    }

    /// Trailing distance, `None` when disabled (absent or zero).
    pub fn trailing_pct(&self) -> Option<f64> {
        self.trailing_stop_pct.filter(|p| *p > 0.0)
    }
}

fn pick<T: Clone>(layers: [Option<&T>; 3]) -> Option<T> {
    layers.into_iter().flatten().next().cloned()
}

pub fn resolve(
    strategy: &StrategyConfig,
    regime: Regime,
    defaults: &DefaultsTable,
) -> Result<EffectiveConfig, QuantlabError> {
    let empty = ConfigLayer::default();
    let over = strategy.override_for(regime).unwrap_or(&empty);
    let base = &strategy.base;
    let def = &defaults.layer;
    let sentinels = &defaults.sentinels;

    let missing = |field: &str| QuantlabError::Config {
        strategy: strategy.name.clone(),
        regime: regime.to_string(),
        field: field.to_string(),
    };
    let invalid = |key: &str, reason: &str| QuantlabError::ConfigInvalid {
        section: format!("{}.{}", strategy.name, regime),
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let mode = pick([
        over.position.mode.as_ref(),
        base.position.mode.as_ref(),
        def.position.mode.as_ref(),
    ])
    .ok_or_else(|| missing("position.mode"))?;
    let sizing = SizingParams {
        mode,
        equity_pct: pick([
            over.position.equity_pct.as_ref(),
            base.position.equity_pct.as_ref(),
            def.position.equity_pct.as_ref(),
        ]),
        fixed_size: pick([
            over.position.fixed_size.as_ref(),
            base.position.fixed_size.as_ref(),
            def.position.fixed_size.as_ref(),
        ]),
        atr_multiplier: pick([
            over.position.atr_multiplier.as_ref(),
            base.position.atr_multiplier.as_ref(),
            def.position.atr_multiplier.as_ref(),
        ]),
    };
    let size_present = match mode {
        SizingMode::EquityPct => sizing.equity_pct.is_some(),
        SizingMode::FixedSize => sizing.fixed_size.is_some(),
        SizingMode::Atr => sizing.atr_multiplier.is_some(),
    };
    if !size_present {
        return Err(missing(mode.size_field()));
    }

    let risk_pct = pick::<Param>([
        over.risk.risk_pct.as_ref(),
        base.risk.risk_pct.as_ref(),
        def.risk.risk_pct.as_ref(),
    ])
    .ok_or_else(|| missing("risk.risk_pct"))?
    .resolve(sentinels);
    let rr = pick::<Param>([
        over.risk.rr.as_ref(),
        base.risk.rr.as_ref(),
        def.risk.rr.as_ref(),
    ])
    .ok_or_else(|| missing("risk.rr"))?
    .resolve(sentinels);

    let trailing_stop_pct = pick([
        over.risk.trailing_stop_pct.as_ref(),
        base.risk.trailing_stop_pct.as_ref(),
        def.risk.trailing_stop_pct.as_ref(),
    ]);
    if trailing_stop_pct.is_some_and(|t| !(0.0..100.0).contains(&t)) {
        return Err(invalid(
            "risk.trailing_stop_pct",
            "trailing_stop_pct must be in [0, 100)",
        ));
    }
    let partial_exit = pick([
        over.risk.partial_exit.as_ref(),
        base.risk.partial_exit.as_ref(),
        def.risk.partial_exit.as_ref(),
    ]);
    if partial_exit.is_some_and(|p| p <= 0.0 || p >= 1.0) {
        return Err(invalid(
            "risk.partial_exit",
            "partial_exit must be a fraction between 0 and 1",
        ));
    }

    let taker_fee_pct = pick([
        over.fees.taker_fee_pct.as_ref(),
        base.fees.taker_fee_pct.as_ref(),
        def.fees.taker_fee_pct.as_ref(),
    ]);
    let maker_fee_pct = pick([
        over.fees.maker_fee_pct.as_ref(),
        base.fees.maker_fee_pct.as_ref(),
        def.fees.maker_fee_pct.as_ref(),
    ]);
    for (key, fee) in [
        ("fees.taker_fee_pct", taker_fee_pct),
        ("fees.maker_fee_pct", maker_fee_pct),
    ] {
        if fee.is_some_and(|f| !f.is_finite() || f < 0.0) {
            return Err(invalid(key, "fee must be non-negative"));
        }
    }

    let rules = |select: fn(&ConfigLayer) -> Option<&Vec<Condition>>| -> Vec<Condition> {
        pick([select(over), select(base), select(def)])
            .unwrap_or_default()
            .iter()
            .map(|c| c.resolve_sentinels(sentinels))
            .collect()
    };

    Ok(EffectiveConfig {
        strategy: strategy.name.clone(),
        regime,
        direction: pick([
            over.direction.as_ref(),
            base.direction.as_ref(),
            def.direction.as_ref(),
        ])
        .unwrap_or_default(),
        sizing,
        risk_pct,
        rr,
        trailing_stop_pct,
        partial_exit,
        taker_fee_pct,
        maker_fee_pct,
        entry_rules: rules(|l| l.entry_rules.as_ref()),
        exit_rules: rules(|l| l.exit_rules.as_ref()),
        filters: rules(|l| l.filters.as_ref()),
    })
}

/// Resolves every regime, failing on the first unusable one.
pub fn resolve_all(
    strategy: &StrategyConfig,
    defaults: &DefaultsTable,
) -> Result<Vec<EffectiveConfig>, QuantlabError> {
    Regime::ALL
        .iter()
        .map(|r| resolve(strategy, *r, defaults))
        .collect()
}

/// Holds the config of the active regime; re-resolves only when the regime changes.
pub struct RegimeConfigCache<'a> {
    strategy: &'a StrategyConfig,
    defaults: &'a DefaultsTable,
    current: Option<EffectiveConfig>,
    resolutions: usize,
}

impl<'a> RegimeConfigCache<'a> {
    pub fn new(strategy: &'a StrategyConfig, defaults: &'a DefaultsTable) -> Self {
        Self {
            strategy,
            defaults,
            current: None,
            resolutions: 0,
        }
    }

    pub fn get(&mut self, regime: Regime) -> Result<&EffectiveConfig, QuantlabError> {
        let cfg = match self.current.take() {
            Some(cfg) if cfg.regime == regime => cfg,
            _ => {
                let cfg = resolve(self.strategy, regime, self.defaults)?;
                self.resolutions += 1;
                cfg
            }
        };
        let cfg: &EffectiveConfig = self.current.insert(cfg);
        Ok(cfg)
    }

    /// How many times a config was resolved.
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }
}
