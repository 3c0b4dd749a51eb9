//! Trade plans, open-position state and closed-trade records.

use crate::domain::regime::Regime;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Long => "long",
            Side::Short => "short",
        })
    }
}

/// Output of the position sizer. Immutable once a position is opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradePlan {
    pub side: Side,
    pub notional: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub risk_amount: f64,
}

impl TradePlan {
    /// Fractional move from entry to stop.
    pub fn stop_distance_pct(&self) -> f64 {
        (self.entry_price - self.stop_price).abs() / self.entry_price
    }

    /// PnL of closing `fraction` of the position at `price`, before fees.
    pub fn gross_pnl(&self, price: f64, fraction: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * self.side.sign() * self.notional * fraction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    PartialTakeProfit,
    SignalExit,
    EndOfData,
}

/// Risk parameters frozen at entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitParams {
    pub trailing_stop_pct: Option<f64>,
    pub partial_exit: Option<f64>,
    pub fee_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub plan: TradePlan,
    pub exit: ExitParams,
    pub remaining_fraction: f64,
    pub best_favorable_price: f64,
    pub worst_adverse_price: f64,
    pub effective_stop: f64,
    pub trailing_active: bool,
    pub status: PositionStatus,
    pub partial_taken: bool,
    pub entry_time: NaiveDateTime,
    pub entry_regime: Regime,
    pub entry_fee: f64,
}

impl OpenPosition {
    pub fn new(
        plan: TradePlan,
        exit: ExitParams,
        entry_time: NaiveDateTime,
        entry_regime: Regime,
    ) -> Self {
        let entry_fee = plan.notional * exit.fee_pct / 100.0;
        Self {
            remaining_fraction: 1.0,
            best_favorable_price: plan.entry_price,
            worst_adverse_price: plan.entry_price,
            effective_stop: plan.stop_price,
            trailing_active: false,
            status: PositionStatus::Open,
            partial_taken: false,
            entry_time,
            entry_regime,
            entry_fee,
            plan,
            exit,
        }
    }

    pub fn side(&self) -> Side {
        self.plan.side
    }

    pub fn remaining_notional(&self) -> f64 {
        self.plan.notional * self.remaining_fraction
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.plan.gross_pnl(price, self.remaining_fraction)
    }

    /// Records the bar's extremes for MAE/MFE and the trailing anchor.
    pub fn observe_extremes(&mut self, high: f64, low: f64) {
        match self.side() {
            Side::Long => {
                self.best_favorable_price = self.best_favorable_price.max(high);
                self.worst_adverse_price = self.worst_adverse_price.min(low);
            }
            Side::Short => {
                self.best_favorable_price = self.best_favorable_price.min(low);
                self.worst_adverse_price = self.worst_adverse_price.max(high);
            }
        }
    }

    /// Moves the effective stop toward the best price; never loosens it.
    pub fn tighten_trailing_stop(&mut self) {
        let Some(pct) = self.exit.trailing_stop_pct.filter(|p| *p > 0.0) else {
            return;
        };
        match self.side() {
            Side::Long => {
                let trailed = self.best_favorable_price * (1.0 - pct / 100.0);
                if trailed > self.effective_stop {
                    self.effective_stop = trailed;
                    self.trailing_active = true;
                }
            }
            Side::Short => {
                let trailed = self.best_favorable_price * (1.0 + pct / 100.0);
                if trailed < self.effective_stop {
                    self.effective_stop = trailed;
                    self.trailing_active = true;
                }
            }
        }
    }

    pub fn stop_hit(&self, high: f64, low: f64) -> bool {
        match self.side() {
            Side::Long => low <= self.effective_stop,
            Side::Short => high >= self.effective_stop,
        }
    }

    pub fn target_hit(&self, high: f64, low: f64) -> bool {
        match self.side() {
            Side::Long => high >= self.plan.target_price,
            Side::Short => low <= self.plan.target_price,
        }
    }

    /// Maximum adverse excursion since entry, in percent (<= 0).
    pub fn mae_pct(&self) -> f64 {
        self.excursion_pct(self.worst_adverse_price).min(0.0)
    }

    /// Maximum favorable excursion since entry, in percent (>= 0).
    pub fn mfe_pct(&self) -> f64 {
        self.excursion_pct(self.best_favorable_price).max(0.0)
    }

    fn excursion_pct(&self, price: f64) -> f64 {
        (price - self.plan.entry_price) / self.plan.entry_price * self.side().sign() * 100.0
    }
}

/// One exit event: a partial take-profit or the final close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_time: NaiveDateTime,
    pub exit_price: f64,
    pub fraction: f64,
    pub notional: f64,
    pub gross_pnl: f64,
    /// Exit fee plus the entry fee attributable to the closed fraction.
    pub fees: f64,
    pub net_pnl: f64,
    pub pnl_r: f64,
    pub exit_reason: ExitReason,
    pub entry_regime: Regime,
    pub mae_pct: f64,
    pub mfe_pct: f64,
    pub hold_seconds: i64,
}

impl ClosedTrade {
    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn sample_long_plan() -> TradePlan {
        TradePlan {
            side: Side::Long,
            notional: 15.0,
            entry_price: 100.0,
            stop_price: 93.0,
            target_price: 110.0,
            risk_amount: 1.05,
        }
    }

    fn sample_short_plan() -> TradePlan {
        TradePlan {
            side: Side::Short,
            notional: 15.0,
            entry_price: 100.0,
            stop_price: 107.0,
            target_price: 90.0,
            risk_amount: 1.05,
        }
    }

    fn exit_params(trailing: Option<f64>) -> ExitParams {
        ExitParams {
            trailing_stop_pct: trailing,
            partial_exit: None,
            fee_pct: 0.1,
        }
    }

    #[test]
    fn gross_pnl_long_and_short() {
        let long = sample_long_plan();
        assert!((long.gross_pnl(93.0, 1.0) - -1.05).abs() < 1e-12);
        let short = sample_short_plan();
        assert!((short.gross_pnl(90.0, 0.5) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn entry_fee_charged_on_notional() {
        let pos = OpenPosition::new(sample_long_plan(), exit_params(None), entry_time(), Regime::Ranging);
        assert!((pos.entry_fee - 0.015).abs() < 1e-12);
        assert_eq!(pos.status, PositionStatus::Open);
    }

    #[test]
    fn trailing_stop_tightens_only() {
        let mut pos = OpenPosition::new(
            sample_long_plan(),
            exit_params(Some(5.0)),
            entry_time(),
            Regime::TrendingUp,
        );
        pos.observe_extremes(101.0, 99.0);
        pos.tighten_trailing_stop();
        assert!((pos.effective_stop - 95.95).abs() < 1e-9);
        assert!(pos.trailing_active);

        pos.observe_extremes(100.0, 96.5);
        pos.tighten_trailing_stop();
        assert!((pos.effective_stop - 95.95).abs() < 1e-9);
    }

    #[test]
    fn trailing_does_not_activate_below_plan_stop() {
        let mut pos = OpenPosition::new(
            sample_long_plan(),
            exit_params(Some(10.0)),
            entry_time(),
            Regime::TrendingUp,
        );
        pos.observe_extremes(101.0, 99.0);
        pos.tighten_trailing_stop();
        assert!((pos.effective_stop - 93.0).abs() < f64::EPSILON);
        assert!(!pos.trailing_active);
    }

    #[test]
    fn short_stop_and_target_use_opposite_extremes() {
        let pos = OpenPosition::new(sample_short_plan(), exit_params(None), entry_time(), Regime::TrendingDown);
        assert!(pos.stop_hit(107.5, 101.0));
        assert!(!pos.stop_hit(106.0, 101.0));
        assert!(pos.target_hit(101.0, 89.0));
    }

    #[test]
    fn excursions_tracked_per_side() {
        let mut pos = OpenPosition::new(sample_short_plan(), exit_params(None), entry_time(), Regime::TrendingDown);
        pos.observe_extremes(104.0, 97.0);
        assert!((pos.mae_pct() - -4.0).abs() < 1e-9);
        assert!((pos.mfe_pct() - 3.0).abs() < 1e-9);
    }
}
