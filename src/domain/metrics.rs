//! Performance metrics over a finished run.
//!
//! Trade statistics count every exit event, so a partial take-profit and the
//! close of its remainder are two entries. Drawdown and the risk-adjusted
//! ratios use the mark-to-market curve.

use crate::domain::backtest::EquityPoint;
use crate::domain::position::ClosedTrade;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest drawdown, in bars.
    pub max_drawdown_duration: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    /// Gross wins over gross losses; `None` when wins exist but no losses.
    pub profit_factor: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_r: f64,
    pub avg_hold_hours: f64,
    pub total_fees: f64,
}

impl Metrics {
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[ClosedTrade],
        initial_capital: f64,
        final_equity: f64,
        periods_per_year: f64,
    ) -> Self {
        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let years = elapsed_years(equity_curve);
        let annualized_return = if years > 0.0 && total_return > -1.0 && total_return.is_finite() {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(equity_curve, periods_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_r = 0.0_f64;
        let mut total_hold_seconds = 0i64;
        let mut total_fees = 0.0_f64;

        for trade in trades {
            let pnl = trade.net_pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_r += trade.pnl_r;
            total_hold_seconds += trade.hold_seconds;
            total_fees += trade.fees;
        }

        let total_trades = trades.len();
        let per_trade = |sum: f64| {
            if total_trades > 0 {
                sum / total_trades as f64
            } else {
                0.0
            }
        };

        let profit_factor = if total_losses > 0.0 {
            Some(total_wins / total_losses)
        } else if total_wins > 0.0 {
            None
        } else {
            Some(0.0)
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate: per_trade(trades_won as f64),
            profit_factor,
            avg_win: if trades_won > 0 {
                total_wins / trades_won as f64
            } else {
                0.0
            },
            avg_loss: if trades_lost > 0 {
                total_losses / trades_lost as f64
            } else {
                0.0
            },
            largest_win,
            largest_loss,
            avg_r: per_trade(total_r),
            avg_hold_hours: per_trade(total_hold_seconds as f64 / 3600.0),
            total_fees,
        }
    }
}

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Wall-clock span of the curve; bars need not be evenly spaced.
fn elapsed_years(equity_curve: &[EquityPoint]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_seconds() as f64 / SECONDS_PER_YEAR
        }
        _ => 0.0,
    }
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.mark_to_market;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        let value = point.mark_to_market;
        if value >= peak {
            peak = value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], periods_per_year: f64) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].mark_to_market;
            let curr = w[1].mark_to_market;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let scale = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        mean / stddev * scale
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|r| **r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside.sqrt();

    let sortino = if downside_stddev > 0.0 {
        mean / downside_stddev * scale
    } else {
        0.0
    };

    (sharpe, sortino)
}
