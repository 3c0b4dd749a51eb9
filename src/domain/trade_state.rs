//! Trade state machine: `flat -> open -> partially_closed -> closed`.
//!
//! Per-bar priority while a position is open:
//! 1. Trailing stop update from the bar's favorable extreme
//! 2. Stop hit, filled at the effective stop
//! 3. Target hit, filled at the target (partial once when configured)
//! 4. Signal exit, filled at the bar's close
//!
//! Only one exit event happens per bar. Fees are charged on the notional
//! closed in each event.

use crate::domain::bar::Bar;
use crate::domain::position::{
    ClosedTrade, ExitParams, ExitReason, OpenPosition, PositionStatus, TradePlan,
};
use crate::domain::rule_set::{ExitDecision, RuleSet};
use serde::Serialize;

/// Realized account equity for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityState {
    initial: f64,
    equity: f64,
    fees_paid: f64,
}

impl EquityState {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            equity: initial,
            fees_paid: 0.0,
        }
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    fn charge_fee(&mut self, fee: f64) {
        self.equity -= fee;
        self.fees_paid += fee;
    }

    fn realize(&mut self, gross_pnl: f64) {
        self.equity += gross_pnl;
    }
}

#[derive(Debug, Default)]
pub struct TradeStateMachine {
    position: Option<OpenPosition>,
}

impl TradeStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// `flat -> open`. The entry fee is deducted immediately.
    /// Returns false (and changes nothing) when a position is already open.
    pub fn open(
        &mut self,
        plan: TradePlan,
        exit: ExitParams,
        bar: &Bar,
        equity: &mut EquityState,
    ) -> bool {
        if self.position.is_some() {
            return false;
        }
        let pos = OpenPosition::new(plan, exit, bar.timestamp, bar.regime);
        equity.charge_fee(pos.entry_fee);
        tracing::debug!(
            side = %pos.side(),
            entry = pos.plan.entry_price,
            stop = pos.plan.stop_price,
            target = pos.plan.target_price,
            notional = pos.plan.notional,
            timestamp = %bar.timestamp,
            "position opened"
        );
        self.position = Some(pos);
        true
    }

    /// Advances the open position by one bar. Returns the exit event, if any.
    pub fn on_bar(
        &mut self,
        prev: Option<&Bar>,
        bar: &Bar,
        rules: &RuleSet,
        equity: &mut EquityState,
    ) -> Option<ClosedTrade> {
        let pos = self.position.as_mut()?;

        pos.observe_extremes(bar.high, bar.low);
        pos.tighten_trailing_stop();

        if pos.stop_hit(bar.high, bar.low) {
            let reason = if pos.trailing_active {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            let price = pos.effective_stop;
            return self.close(bar, price, None, reason, equity);
        }

        if pos.target_hit(bar.high, bar.low) {
            let price = pos.plan.target_price;
            let partial = if pos.partial_taken {
                None
            } else {
                pos.exit.partial_exit
            };
            return match partial {
                Some(fraction) => self.close(
                    bar,
                    price,
                    Some(fraction),
                    ExitReason::PartialTakeProfit,
                    equity,
                ),
                None => self.close(bar, price, None, ExitReason::TakeProfit, equity),
            };
        }

        if rules.should_exit(pos.side(), prev, bar) == ExitDecision::Signal {
            return self.close(bar, bar.close, None, ExitReason::SignalExit, equity);
        }
        None
    }

    /// Closes whatever remains at `price`, e.g. at the end of the data.
    pub fn close_remaining(
        &mut self,
        bar: &Bar,
        price: f64,
        reason: ExitReason,
        equity: &mut EquityState,
    ) -> Option<ClosedTrade> {
        self.close(bar, price, None, reason, equity)
    }

    /// Closes `fraction` of the original position, or everything left when `None`.
    fn close(
        &mut self,
        bar: &Bar,
        price: f64,
        fraction: Option<f64>,
        reason: ExitReason,
        equity: &mut EquityState,
    ) -> Option<ClosedTrade> {
        let pos = self.position.as_mut()?;
        let closed = fraction
            .map(|f| f.min(pos.remaining_fraction))
            .unwrap_or(pos.remaining_fraction);

        let gross_pnl = pos.plan.gross_pnl(price, closed);
        let notional = pos.plan.notional * closed;
        let exit_fee = notional * pos.exit.fee_pct / 100.0;
        let fees = exit_fee + pos.entry_fee * closed;
        let net_pnl = gross_pnl - fees;
        let risk = pos.plan.risk_amount * closed;

        equity.realize(gross_pnl);
        equity.charge_fee(exit_fee);

        let trade = ClosedTrade {
            side: pos.side(),
            entry_time: pos.entry_time,
            entry_price: pos.plan.entry_price,
            exit_time: bar.timestamp,
            exit_price: price,
            fraction: closed,
            notional,
            gross_pnl,
            fees,
            net_pnl,
            pnl_r: if risk > 0.0 { net_pnl / risk } else { 0.0 },
            exit_reason: reason,
            entry_regime: pos.entry_regime,
            mae_pct: pos.mae_pct(),
            mfe_pct: pos.mfe_pct(),
            hold_seconds: (bar.timestamp - pos.entry_time).num_seconds(),
        };

        pos.remaining_fraction -= closed;
        if fraction.is_some() && pos.remaining_fraction > f64::EPSILON {
            pos.partial_taken = true;
            pos.status = PositionStatus::PartiallyClosed;
        } else {
            pos.status = PositionStatus::Closed;
            self.position = None;
        }

        tracing::debug!(
            reason = ?trade.exit_reason,
            exit = trade.exit_price,
            fraction = trade.fraction,
            net_pnl = trade.net_pnl,
            equity = equity.equity(),
            "position closed"
        );
        Some(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{Condition, Param};
    use crate::domain::position::Side;
    use crate::domain::regime::Regime;
    use crate::domain::strategy::DirectionPolicy;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::collections::HashMap;

    fn ts(hour: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(hour)
    }

    fn make_bar(hour: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts(hour),
            open: close,
            high,
            low,
            close,
            indicators: HashMap::new(),
            regime: Regime::Ranging,
        }
    }

    fn sample_plan() -> TradePlan {
        TradePlan {
            side: Side::Long,
            notional: 15.0,
            entry_price: 100.0,
            stop_price: 100.0 * (1.0 - 1.0 / 15.0),
            target_price: 100.0 * (1.0 + 1.5 / 15.0),
            risk_amount: 1.0,
        }
    }

    fn exit_params(fee_pct: f64, partial: Option<f64>, trailing: Option<f64>) -> ExitParams {
        ExitParams {
            trailing_stop_pct: trailing,
            partial_exit: partial,
            fee_pct,
        }
    }

    fn no_rules() -> RuleSet {
        RuleSet::new(DirectionPolicy::Long, vec![], vec![], vec![])
    }

    fn opened(exit: ExitParams, equity: &mut EquityState) -> TradeStateMachine {
        let mut sm = TradeStateMachine::new();
        assert!(sm.open(sample_plan(), exit, &make_bar(0, 100.0, 100.0, 100.0), equity));
        sm
    }

    #[test]
    fn target_hit_realizes_reward() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.0, None, None), &mut equity);
        let trade = sm
            .on_bar(None, &make_bar(1, 111.0, 101.0, 110.0), &no_rules(), &mut equity)
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(trade.net_pnl, 1.5, epsilon = 1e-9);
        assert_relative_eq!(equity.equity(), 101.5, epsilon = 1e-9);
        assert!(sm.is_flat());
    }

    #[test]
    fn stop_wins_when_both_hit_in_one_bar() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.0, None, None), &mut equity);
        let trade = sm
            .on_bar(None, &make_bar(1, 120.0, 80.0, 100.0), &no_rules(), &mut equity)
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.exit_price, sample_plan().stop_price);
        assert_relative_eq!(trade.gross_pnl, -1.0, epsilon = 1e-9);
        assert_relative_eq!(trade.pnl_r, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn fees_charged_per_side_on_closed_notional() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.1, None, None), &mut equity);
        assert_relative_eq!(equity.equity(), 100.0 - 0.015, epsilon = 1e-12);
        let trade = sm
            .on_bar(None, &make_bar(1, 111.0, 101.0, 110.0), &no_rules(), &mut equity)
            .unwrap();
        assert_relative_eq!(trade.fees, 0.03, epsilon = 1e-12);
        assert_relative_eq!(trade.net_pnl, 1.47, epsilon = 1e-9);
        assert_relative_eq!(equity.equity(), 101.47, epsilon = 1e-9);
        assert_relative_eq!(equity.fees_paid(), 0.03, epsilon = 1e-12);
    }

    #[test]
    fn partial_exit_taken_once_then_full_close() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.1, Some(0.5), None), &mut equity);

        let first = sm
            .on_bar(None, &make_bar(1, 111.0, 101.0, 110.0), &no_rules(), &mut equity)
            .unwrap();
        assert_eq!(first.exit_reason, ExitReason::PartialTakeProfit);
        assert_relative_eq!(first.fraction, 0.5);
        assert_relative_eq!(first.fees, 0.015, epsilon = 1e-12);
        let pos = sm.position().unwrap();
        assert_eq!(pos.status, PositionStatus::PartiallyClosed);
        assert_relative_eq!(pos.remaining_fraction, 0.5);
        assert_relative_eq!(pos.plan.target_price, sample_plan().target_price);

        let second = sm
            .on_bar(None, &make_bar(2, 112.0, 105.0, 111.0), &no_rules(), &mut equity)
            .unwrap();
        assert_eq!(second.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(second.fraction, 0.5);
        assert!(sm.is_flat());
        assert_relative_eq!(first.net_pnl + second.net_pnl, 1.47, epsilon = 1e-9);
    }

    #[test]
    fn trailing_stop_exits_with_trailing_reason() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.0, None, Some(2.0)), &mut equity);
        assert!(sm
            .on_bar(None, &make_bar(1, 105.0, 104.0, 104.5), &no_rules(), &mut equity)
            .is_none());
        let stop = sm.position().unwrap().effective_stop;
        assert_relative_eq!(stop, 102.9, epsilon = 1e-9);

        let trade = sm
            .on_bar(None, &make_bar(2, 104.0, 102.0, 102.5), &no_rules(), &mut equity)
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
        assert_relative_eq!(trade.exit_price, 102.9, epsilon = 1e-9);
        assert!(trade.gross_pnl > 0.0);
    }

    #[test]
    fn signal_exit_fills_at_close() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.0, None, None), &mut equity);
        let rules = RuleSet::new(
            DirectionPolicy::Long,
            vec![],
            vec![Condition::Rsi {
                above: Some(Param::Value(70.0)),
                below: None,
            }],
            vec![],
        );
        let bar = make_bar(3, 103.0, 101.0, 102.0).with_indicator("rsi", 75.0);
        let trade = sm.on_bar(None, &bar, &rules, &mut equity).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::SignalExit);
        assert_relative_eq!(trade.exit_price, 102.0);
        assert_eq!(trade.hold_seconds, 3 * 3600);
    }

    #[test]
    fn open_rejected_while_in_position() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.1, None, None), &mut equity);
        let before = equity.equity();
        assert!(!sm.open(
            sample_plan(),
            exit_params(0.1, None, None),
            &make_bar(1, 100.0, 100.0, 100.0),
            &mut equity
        ));
        assert_relative_eq!(equity.equity(), before);
    }

    #[test]
    fn close_remaining_at_end_of_data() {
        let mut equity = EquityState::new(100.0);
        let mut sm = opened(exit_params(0.0, None, None), &mut equity);
        let bar = make_bar(5, 101.0, 99.0, 100.0);
        let trade = sm
            .close_remaining(&bar, bar.close, ExitReason::EndOfData, &mut equity)
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::EndOfData);
        assert_relative_eq!(trade.gross_pnl, 0.0);
        assert!(sm.is_flat());
    }
}
