//! Position sizing.
//!
//! Risk is always measured against total equity: `risk_amount = equity *
//! risk_pct / 100`, and the stop is placed so that hitting it loses exactly
//! `risk_amount` on the sized notional.

use crate::domain::config_resolver::EffectiveConfig;
use crate::domain::error::QuantlabError;
use crate::domain::position::{Side, TradePlan};
use crate::domain::strategy::SizingMode;

pub fn size(
    cfg: &EffectiveConfig,
    equity: f64,
    entry_price: f64,
    side: Side,
    atr: Option<f64>,
) -> Result<TradePlan, QuantlabError> {
    let insufficient = |field: &str, reason: &str| QuantlabError::InsufficientConfig {
        strategy: cfg.strategy.clone(),
        regime: cfg.regime.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    };
    let zero_size = || QuantlabError::ZeroSize {
        strategy: cfg.strategy.clone(),
        regime: cfg.regime.to_string(),
    };

    if !entry_price.is_finite() || entry_price <= 0.0 {
        return Err(QuantlabError::DataLoad {
            reason: format!("cannot size at non-positive entry price {entry_price}"),
        });
    }
    if cfg.risk_pct <= 0.0 {
        return Err(insufficient("risk.risk_pct", "must be positive"));
    }
    if cfg.rr <= 0.0 {
        return Err(insufficient("risk.rr", "must be positive"));
    }

    let risk_amount = equity * cfg.risk_pct / 100.0;
    let notional = match cfg.sizing.mode {
        SizingMode::EquityPct => match cfg.sizing.equity_pct {
            Some(pct) if pct > 0.0 => equity * pct / 100.0,
            Some(_) => return Err(insufficient("position.equity_pct", "must be positive")),
            None => return Err(insufficient("position.equity_pct", "missing for equity_pct mode")),
        },
        SizingMode::FixedSize => match cfg.sizing.fixed_size {
            Some(size) if size >= 0.0 => size,
            Some(_) => return Err(insufficient("position.fixed_size", "must not be negative")),
            None => return Err(insufficient("position.fixed_size", "missing for fixed_size mode")),
        },
        SizingMode::Atr => {
            let multiplier = match cfg.sizing.atr_multiplier {
                Some(m) if m > 0.0 => m,
                Some(_) => return Err(insufficient("position.atr_multiplier", "must be positive")),
                None => {
                    return Err(insufficient(
                        "position.atr_multiplier",
                        "missing for atr mode",
                    ));
                }
            };
            let atr = atr.filter(|a| a.is_finite() && *a > 0.0).ok_or_else(|| {
                QuantlabError::IndicatorMissing {
                    indicator: "atr".to_string(),
                }
            })?;
            risk_amount * entry_price / (atr * multiplier)
        }
    };

    if notional <= 0.0 || !notional.is_finite() {
        return Err(zero_size());
    }

    let stop_distance_pct = risk_amount / notional;
    let target_distance_pct = stop_distance_pct * cfg.rr;
    let sign = side.sign();

    Ok(TradePlan {
        side,
        notional,
        entry_price,
        stop_price: entry_price * (1.0 - sign * stop_distance_pct),
        target_price: entry_price * (1.0 + sign * target_distance_pct),
        risk_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config_resolver::SizingParams;
    use crate::domain::regime::Regime;
    use crate::domain::strategy::DirectionPolicy;
    use approx::assert_relative_eq;

    fn make_config(mode: SizingMode) -> EffectiveConfig {
        EffectiveConfig {
            strategy: "scenario".into(),
            regime: Regime::Ranging,
            direction: DirectionPolicy::Long,
            sizing: SizingParams {
                mode,
                equity_pct: Some(15.0),
                fixed_size: Some(50.0),
                atr_multiplier: Some(2.0),
            },
            risk_pct: 1.0,
            rr: 1.5,
            trailing_stop_pct: Some(0.0),
            partial_exit: None,
            taker_fee_pct: None,
            maker_fee_pct: None,
            entry_rules: vec![],
            exit_rules: vec![],
            filters: vec![],
        }
    }

    #[test]
    fn equity_pct_documented_example() {
        let plan = size(&make_config(SizingMode::EquityPct), 100.0, 100.0, Side::Long, None).unwrap();
        assert_relative_eq!(plan.notional, 15.0);
        assert_relative_eq!(plan.risk_amount, 1.0);
        assert_relative_eq!(plan.stop_distance_pct(), 1.0 / 15.0, epsilon = 1e-12);
        assert!(plan.stop_price < plan.entry_price);
        assert_relative_eq!(plan.gross_pnl(plan.target_price, 1.0), 1.5, epsilon = 1e-9);
        assert_relative_eq!(plan.gross_pnl(plan.stop_price, 1.0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn short_places_stop_above() {
        let plan = size(&make_config(SizingMode::EquityPct), 100.0, 50.0, Side::Short, None).unwrap();
        assert!(plan.stop_price > 50.0);
        assert!(plan.target_price < 50.0);
        assert_relative_eq!(plan.gross_pnl(plan.stop_price, 1.0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn fixed_size_ignores_equity_for_notional() {
        let plan = size(&make_config(SizingMode::FixedSize), 200.0, 10.0, Side::Long, None).unwrap();
        assert_relative_eq!(plan.notional, 50.0);
        assert_relative_eq!(plan.risk_amount, 2.0);
    }

    #[test]
    fn atr_mode_derives_notional_from_stop_distance() {
        let plan = size(&make_config(SizingMode::Atr), 100.0, 100.0, Side::Long, Some(2.5)).unwrap();
        assert_relative_eq!(plan.entry_price - plan.stop_price, 5.0, epsilon = 1e-9);
        assert_relative_eq!(plan.notional, 20.0, epsilon = 1e-9);
        assert_relative_eq!(plan.gross_pnl(plan.stop_price, 1.0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn atr_mode_without_atr_is_indicator_missing() {
        let err = size(&make_config(SizingMode::Atr), 100.0, 100.0, Side::Long, None).unwrap_err();
        assert!(matches!(err, QuantlabError::IndicatorMissing { indicator } if indicator == "atr"));
    }

    #[test]
    fn missing_fixed_size_is_insufficient() {
        let mut cfg = make_config(SizingMode::FixedSize);
        cfg.sizing.fixed_size = None;
        let err = size(&cfg, 100.0, 100.0, Side::Long, None).unwrap_err();
        assert!(
            matches!(err, QuantlabError::InsufficientConfig { field, .. } if field == "position.fixed_size")
        );
    }

    #[test]
    fn non_positive_equity_pct_is_insufficient() {
        let mut cfg = make_config(SizingMode::EquityPct);
        cfg.sizing.equity_pct = Some(0.0);
        let err = size(&cfg, 100.0, 100.0, Side::Long, None).unwrap_err();
        assert!(matches!(err, QuantlabError::InsufficientConfig { .. }));
    }

    #[test]
    fn zero_fixed_size_is_zero_size() {
        let mut cfg = make_config(SizingMode::FixedSize);
        cfg.sizing.fixed_size = Some(0.0);
        let err = size(&cfg, 100.0, 100.0, Side::Long, None).unwrap_err();
        assert!(matches!(err, QuantlabError::ZeroSize { .. }));
    }

    #[test]
    fn zero_equity_is_zero_size() {
        let err = size(&make_config(SizingMode::EquityPct), 0.0, 100.0, Side::Long, None).unwrap_err();
        assert!(matches!(err, QuantlabError::ZeroSize { .. }));
    }
}
