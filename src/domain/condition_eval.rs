//! Condition evaluation against precomputed bar indicators.
//!
//! # Evaluation Semantics
//!
//! - Cross conditions compare `prev` and `bar`; with no previous bar they are false
//! - A missing (or NaN) indicator makes the condition false for that bar
//! - Thresholds still holding a sentinel never compare true

use crate::domain::bar::Bar;
use crate::domain::condition::{
    Condition, CrossDirection, NEAR_BAND_FRACTION, Param, PullbackSide, bb_key, ema_key,
};
use crate::domain::error::QuantlabError;

pub fn evaluate(condition: &Condition, prev: Option<&Bar>, bar: &Bar) -> bool {
    match try_evaluate(condition, prev, bar) {
        Ok(hit) => hit,
        Err(err) => {
            tracing::trace!(
                condition = condition.type_name(),
                timestamp = %bar.timestamp,
                %err,
                "condition degraded to false"
            );
            false
        }
    }
}

/// Like [`evaluate`] but surfaces `IndicatorMissing` instead of degrading.
pub fn try_evaluate(
    condition: &Condition,
    prev: Option<&Bar>,
    bar: &Bar,
) -> Result<bool, QuantlabError> {
    if condition.needs_previous_bar() && prev.is_none() {
        return Ok(false);
    }

    match condition {
        Condition::MacdCross { direction } => {
            cross(*direction, prev, bar, "macd", "macd_signal")
        }
        Condition::EmaCross {
            fast,
            slow,
            direction,
        } => cross(*direction, prev, bar, &ema_key(*fast), &ema_key(*slow)),
        Condition::StochasticCross {
            direction,
            above,
            below,
        } => {
            if !cross(*direction, prev, bar, "stoch_k", "stoch_d")? {
                return Ok(false);
            }
            let k = bar.indicator("stoch_k")?;
            Ok(within(k, *above, *below))
        }
        Condition::Adx { above, below } => {
            if above.is_none() && below.is_none() {
                return Ok(false);
            }
            Ok(within(bar.indicator("adx")?, *above, *below))
        }
        Condition::Rsi { above, below } => {
            if above.is_none() && below.is_none() {
                return Ok(false);
            }
            Ok(within(bar.indicator("rsi")?, *above, *below))
        }
        Condition::VolumeZscore { above, below } => {
            if above.is_none() && below.is_none() {
                return Ok(false);
            }
            Ok(within(bar.indicator("volume_zscore")?, *above, *below))
        }
        Condition::PriceAboveEma { period } => Ok(bar.close > bar.indicator(&ema_key(*period))?),
        Condition::PriceBelowEma { period } => Ok(bar.close < bar.indicator(&ema_key(*period))?),
        Condition::PriceAboveBb { std } => Ok(bar.close > bar.indicator(&bb_key("upper", *std))?),
        Condition::PriceBelowBb { std } => Ok(bar.close < bar.indicator(&bb_key("lower", *std))?),
        Condition::PriceNearBbLower { std } => {
            let lower = bar.indicator(&bb_key("lower", *std))?;
            let mid = bar.indicator(&bb_key("mid", *std))?;
            Ok(bar.close <= lower + (mid - lower) * NEAR_BAND_FRACTION)
        }
        Condition::PriceNearBbUpper { std } => {
            let upper = bar.indicator(&bb_key("upper", *std))?;
            let mid = bar.indicator(&bb_key("mid", *std))?;
            Ok(bar.close >= upper - (upper - mid) * NEAR_BAND_FRACTION)
        }
        Condition::PriceCrossesMidBb => {
            let Some(prev) = prev else { return Ok(false) };
            Ok(prev.close < prev.indicator("bb_mid")? && bar.close >= bar.indicator("bb_mid")?)
        }
        Condition::PriceCrossesMidBbDown => {
            let Some(prev) = prev else { return Ok(false) };
            Ok(prev.close > prev.indicator("bb_mid")? && bar.close <= bar.indicator("bb_mid")?)
        }
        Condition::BreakoutHigh { buffer_pct } => {
            Ok(bar.close > bar.indicator("bb_upper")? * (1.0 + buffer_pct))
        }
        Condition::BreakoutLow { buffer_pct } => {
            Ok(bar.close < bar.indicator("bb_lower")? * (1.0 - buffer_pct))
        }
        Condition::VolatilityExpansion { multiplier } => {
            Ok(atr_ratio(prev, bar)?.is_some_and(|r| r > *multiplier))
        }
        Condition::RangeContraction { multiplier } => {
            Ok(atr_ratio(prev, bar)?.is_some_and(|r| r < *multiplier))
        }
        Condition::TrendPullback {
            period,
            max_pullback_pct,
            direction,
        } => {
            let ema = bar.indicator(&ema_key(*period))?;
            let lower = ema * (1.0 - max_pullback_pct);
            let upper = ema * (1.0 + max_pullback_pct);
            let price = bar.close;
            Ok(match direction {
                Some(PullbackSide::Long) => lower <= price && price <= ema,
                Some(PullbackSide::Short) => ema <= price && price <= upper,
                None => lower <= price && price <= upper,
            })
        }
    }
}

fn cross(
    direction: CrossDirection,
    prev: Option<&Bar>,
    bar: &Bar,
    fast: &str,
    slow: &str,
) -> Result<bool, QuantlabError> {
    let Some(prev) = prev else { return Ok(false) };
    let (prev_fast, prev_slow) = (prev.indicator(fast)?, prev.indicator(slow)?);
    let (curr_fast, curr_slow) = (bar.indicator(fast)?, bar.indicator(slow)?);
    Ok(match direction {
        CrossDirection::Up => prev_fast <= prev_slow && curr_fast > curr_slow,
        CrossDirection::Down => prev_fast >= prev_slow && curr_fast < curr_slow,
    })
}

/// Current ATR over previous ATR; `None` when the previous ATR is zero.
fn atr_ratio(prev: Option<&Bar>, bar: &Bar) -> Result<Option<f64>, QuantlabError> {
    let Some(prev) = prev else { return Ok(None) };
    let prev_atr = prev.indicator("atr")?;
    let curr_atr = bar.indicator("atr")?;
    if prev_atr == 0.0 {
        return Ok(None);
    }
    Ok(Some(curr_atr / prev_atr))
}

fn within(value: f64, above: Option<Param>, below: Option<Param>) -> bool {
    let threshold = |p: Param| p.value().unwrap_or(f64::NAN);
    above.is_none_or(|a| value > threshold(a)) && below.is_none_or(|b| value < threshold(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::Sentinel;
    use crate::domain::regime::Regime;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn make_bar(day: u32, close: f64, indicators: &[(&str, f64)]) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            indicators: indicators
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
            regime: Regime::Ranging,
        }
    }

    fn value(v: f64) -> Option<Param> {
        Some(Param::Value(v))
    }

    #[test]
    fn macd_cross_up_true() {
        let prev = make_bar(1, 100.0, &[("macd", -0.5), ("macd_signal", 0.0)]);
        let bar = make_bar(2, 101.0, &[("macd", 0.4), ("macd_signal", 0.1)]);
        let cond = Condition::MacdCross {
            direction: CrossDirection::Up,
        };
        assert!(evaluate(&cond, Some(&prev), &bar));
    }

    #[test]
    fn macd_cross_false_without_previous_bar() {
        let bar = make_bar(2, 101.0, &[("macd", 0.4), ("macd_signal", 0.1)]);
        let cond = Condition::MacdCross {
            direction: CrossDirection::Up,
        };
        assert!(!evaluate(&cond, None, &bar));
    }

    #[test]
    fn macd_cross_down_requires_crossing() {
        let prev = make_bar(1, 100.0, &[("macd", -0.5), ("macd_signal", 0.0)]);
        let bar = make_bar(2, 99.0, &[("macd", -0.6), ("macd_signal", -0.1)]);
        let cond = Condition::MacdCross {
            direction: CrossDirection::Down,
        };
        assert!(!evaluate(&cond, Some(&prev), &bar));
    }

    #[test]
    fn adx_above_threshold() {
        let bar = make_bar(1, 100.0, &[("adx", 32.0)]);
        assert!(evaluate(
            &Condition::Adx {
                above: value(30.0),
                below: None
            },
            None,
            &bar
        ));
        assert!(!evaluate(
            &Condition::Adx {
                above: value(35.0),
                below: None
            },
            None,
            &bar
        ));
    }

    #[test]
    fn unresolved_sentinel_never_true() {
        let bar = make_bar(1, 100.0, &[("adx", 99.0)]);
        let cond = Condition::Adx {
            above: Some(Param::Sentinel(Sentinel::ModeThreshold)),
            below: None,
        };
        assert!(!evaluate(&cond, None, &bar));
    }

    #[test]
    fn rsi_band_requires_both_bounds() {
        let bar = make_bar(1, 100.0, &[("rsi", 55.0)]);
        let inside = Condition::Rsi {
            above: value(50.0),
            below: value(60.0),
        };
        let outside = Condition::Rsi {
            above: value(56.0),
            below: value(60.0),
        };
        assert!(evaluate(&inside, None, &bar));
        assert!(!evaluate(&outside, None, &bar));
    }

    #[test]
    fn missing_indicator_degrades_to_false() {
        let bar = make_bar(1, 100.0, &[]);
        let cond = Condition::Rsi {
            above: None,
            below: value(30.0),
        };
        assert!(!evaluate(&cond, None, &bar));
        assert!(matches!(
            try_evaluate(&cond, None, &bar),
            Err(QuantlabError::IndicatorMissing { .. })
        ));
    }

    #[test]
    fn price_above_ema_uses_period_key() {
        let bar = make_bar(1, 105.0, &[("ema_150", 100.0), ("ema_50", 110.0)]);
        assert!(evaluate(&Condition::PriceAboveEma { period: 150 }, None, &bar));
        assert!(!evaluate(&Condition::PriceAboveEma { period: 50 }, None, &bar));
        assert!(evaluate(&Condition::PriceBelowEma { period: 50 }, None, &bar));
    }

    #[test]
    fn bollinger_std_selects_suffixed_band() {
        let bar = make_bar(1, 95.0, &[("bb_lower", 94.0), ("bb_lower_2.5", 96.0)]);
        assert!(!evaluate(&Condition::PriceBelowBb { std: None }, None, &bar));
        assert!(evaluate(&Condition::PriceBelowBb { std: Some(2.5) }, None, &bar));
    }

    #[test]
    fn price_near_bb_lower_within_tenth_of_half_band() {
        let near = make_bar(1, 90.9, &[("bb_lower", 90.0), ("bb_mid", 100.0)]);
        let far = make_bar(2, 91.5, &[("bb_lower", 90.0), ("bb_mid", 100.0)]);
        let cond = Condition::PriceNearBbLower { std: None };
        assert!(evaluate(&cond, None, &near));
        assert!(!evaluate(&cond, None, &far));
    }

    #[test]
    fn price_crosses_mid_bb_up_and_down() {
        let prev = make_bar(1, 99.0, &[("bb_mid", 100.0)]);
        let bar = make_bar(2, 100.5, &[("bb_mid", 100.0)]);
        assert!(evaluate(&Condition::PriceCrossesMidBb, Some(&prev), &bar));
        assert!(!evaluate(&Condition::PriceCrossesMidBbDown, Some(&prev), &bar));
        assert!(evaluate(&Condition::PriceCrossesMidBbDown, Some(&bar), &prev));
    }

    #[test]
    fn volatility_expansion_ratio() {
        let prev = make_bar(1, 100.0, &[("atr", 2.0)]);
        let bar = make_bar(2, 100.0, &[("atr", 3.2)]);
        assert!(evaluate(
            &Condition::VolatilityExpansion { multiplier: 1.5 },
            Some(&prev),
            &bar
        ));
        assert!(!evaluate(
            &Condition::RangeContraction { multiplier: 0.75 },
            Some(&prev),
            &bar
        ));
    }

    #[test]
    fn zero_previous_atr_is_false() {
        let prev = make_bar(1, 100.0, &[("atr", 0.0)]);
        let bar = make_bar(2, 100.0, &[("atr", 3.0)]);
        assert!(!evaluate(
            &Condition::VolatilityExpansion { multiplier: 1.5 },
            Some(&prev),
            &bar
        ));
    }

    #[test]
    fn trend_pullback_sides() {
        let bar = make_bar(1, 99.0, &[("ema_50", 100.0)]);
        let long = Condition::TrendPullback {
            period: 50,
            max_pullback_pct: 0.02,
            direction: Some(PullbackSide::Long),
        };
        assert!(evaluate(&long, None, &bar));
        assert!(!evaluate(&long.inverted(), None, &bar));
    }

    #[test]
    fn breakout_high_respects_buffer() {
        let bar = make_bar(1, 101.0, &[("bb_upper", 100.0)]);
        assert!(evaluate(&Condition::BreakoutHigh { buffer_pct: 0.0 }, None, &bar));
        assert!(!evaluate(&Condition::BreakoutHigh { buffer_pct: 0.02 }, None, &bar));
    }

    #[test]
    fn volume_zscore_above() {
        let bar = make_bar(1, 100.0, &[("volume_zscore", 2.5)]);
        assert!(evaluate(
            &Condition::VolumeZscore {
                above: value(2.0),
                below: None
            },
            None,
            &bar
        ));
    }

    #[test]
    fn stochastic_cross_gated_by_level() {
        let prev = make_bar(1, 100.0, &[("stoch_k", 15.0), ("stoch_d", 18.0)]);
        let bar = make_bar(2, 100.0, &[("stoch_k", 22.0), ("stoch_d", 19.0)]);
        let gated = Condition::StochasticCross {
            direction: CrossDirection::Up,
            above: None,
            below: value(20.0),
        };
        let open = Condition::StochasticCross {
            direction: CrossDirection::Up,
            above: None,
            below: value(30.0),
        };
        assert!(!evaluate(&gated, Some(&prev), &bar));
        assert!(evaluate(&open, Some(&prev), &bar));
    }
}
