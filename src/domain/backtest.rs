//! Backtest engine and event loop.
//!
//! A run is atomic: every regime's config is resolved, sized and checked
//! before the first bar is processed, so configuration errors never surface
//! mid-run. Bars are processed strictly in order; a position opened at a
//! bar's close is first managed on the following bar.

use crate::domain::bar::{Bar, ensure_ordered, validate_bars};
use crate::domain::config_resolver::{EffectiveConfig, RegimeConfigCache, resolve_all};
use crate::domain::config_validation::validate_engine_config;
use crate::domain::defaults::DefaultsTable;
use crate::domain::error::QuantlabError;
use crate::domain::metrics::Metrics;
use crate::domain::position::{ClosedTrade, ExitParams, ExitReason, Side};
use crate::domain::regime::Regime;
use crate::domain::rule_set::{EntryDecision, RuleSet};
use crate::domain::sizing::size;
use crate::domain::strategy::StrategyConfig;
use crate::domain::timeframe::Timeframe;
use crate::domain::trade_state::{EquityState, TradeStateMachine};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Close an open position at the last bar's close.
    pub close_at_end: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            close_at_end: true,
        }
    }
}

impl BacktestConfig {
    /// Reads `[engine] initial_capital` and `close_at_end`, defaulting absent keys.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantlabError> {
        validate_engine_config(config)?;
        let defaults = Self::default();
        Ok(Self {
            initial_capital: config.get_double(
                "engine",
                "initial_capital",
                defaults.initial_capital,
            ),
            close_at_end: config.get_bool("engine", "close_at_end", defaults.close_at_end),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    /// Realized equity after this bar.
    pub equity: f64,
    /// Realized equity plus the open position's unrealized PnL at the close.
    pub mark_to_market: f64,
    pub regime: Regime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegimeStats {
    pub bars: BTreeMap<Regime, usize>,
    /// Transitions between consecutive bars' regimes.
    pub changes: usize,
    /// Net PnL attributed to the regime a trade was entered in.
    pub pnl: BTreeMap<Regime, f64>,
    pub vetoed_entries: usize,
    pub skipped_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub regime_stats: RegimeStats,
    pub metrics: Metrics,
    /// True when the run ended with a position still open (`close_at_end` off).
    pub position_open_at_end: bool,
}

/// Checks everything that could make a run fail, without touching any bar.
/// Returns the effective config of each regime.
pub fn validate_strategy(
    strategy: &StrategyConfig,
    defaults: &DefaultsTable,
    config: &BacktestConfig,
) -> Result<Vec<EffectiveConfig>, QuantlabError> {
    if !config.initial_capital.is_finite() || config.initial_capital <= 0.0 {
        return Err(QuantlabError::ConfigInvalid {
            section: "engine".into(),
            key: "initial_capital".into(),
            reason: "initial_capital must be positive".into(),
        });
    }
    strategy
        .timeframe
        .parse::<Timeframe>()
        .map_err(|reason| QuantlabError::ConfigInvalid {
            section: strategy.name.clone(),
            key: "timeframe".into(),
            reason,
        })?;
    for (location, rules) in strategy.rule_locations() {
        for (i, condition) in rules.iter().enumerate() {
            condition
                .validate()
                .map_err(|reason| QuantlabError::ConditionInvalid {
                    strategy: strategy.name.clone(),
                    location: format!("{location}[{i}]"),
                    reason,
                })?;
        }
    }

    let configs = resolve_all(strategy, defaults)?;
    for cfg in &configs {
        // ATR sizing is checked with a unit ATR; the real one comes per bar.
        size(cfg, config.initial_capital, 1.0, Side::Long, Some(1.0))?;
    }
    Ok(configs)
}

pub fn run_backtest(
    strategy: &StrategyConfig,
    bars: &[Bar],
    defaults: &DefaultsTable,
    config: &BacktestConfig,
) -> Result<BacktestResult, QuantlabError> {
    ensure_ordered(bars)?;
    validate_bars(bars)?;
    validate_strategy(strategy, defaults, config)?;

    let periods_per_year = strategy
        .timeframe
        .parse::<Timeframe>()
        .map(|tf| tf.periods_per_year())
        .unwrap_or(Timeframe::H1.periods_per_year());

    tracing::info!(
        strategy = %strategy.name,
        symbol = %strategy.symbol,
        bars = bars.len(),
        enabled = strategy.enabled,
        "backtest started"
    );
    if !strategy.enabled {
        tracing::info!(strategy = %strategy.name, "strategy disabled, no entries will be taken");
    }

    let mut equity = EquityState::new(config.initial_capital);
    let mut machine = TradeStateMachine::new();
    let mut cache = RegimeConfigCache::new(strategy, defaults);
    let mut active_rules: Option<(Regime, RuleSet)> = None;
    let mut trades: Vec<ClosedTrade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
    let mut stats = RegimeStats::default();
    let mut last_regime: Option<Regime> = None;

    for (i, bar) in bars.iter().enumerate() {
        let prev = i.checked_sub(1).map(|j| &bars[j]);
        let regime = bar.regime;

        *stats.bars.entry(regime).or_insert(0) += 1;
        if last_regime.is_some_and(|r| r != regime) {
            stats.changes += 1;
        }
        last_regime = Some(regime);

        let cfg = cache.get(regime)?;
        if active_rules.as_ref().is_none_or(|(r, _)| *r != regime) {
            active_rules = Some((regime, RuleSet::from_config(cfg)));
        }
        let Some((_, rules)) = active_rules.as_ref() else {
            continue;
        };

        let mut closed_this_bar = false;
        if let Some(trade) = machine.on_bar(prev, bar, rules, &mut equity) {
            *stats.pnl.entry(trade.entry_regime).or_insert(0.0) += trade.net_pnl;
            closed_this_bar = true;
            trades.push(trade);
        }

        if strategy.enabled && machine.is_flat() && !closed_this_bar {
            match rules.entry_decision(prev, bar) {
                EntryDecision::Stay => {}
                EntryDecision::Vetoed => stats.vetoed_entries += 1,
                EntryDecision::Enter(side) => {
                    if equity.equity() <= 0.0 {
                        tracing::warn!(
                            equity = equity.equity(),
                            timestamp = %bar.timestamp,
                            "equity depleted, entry skipped"
                        );
                        stats.skipped_entries += 1;
                    } else {
                        let atr = bar.indicator("atr").ok();
                        match size(cfg, equity.equity(), bar.close, side, atr) {
                            Ok(plan) => {
                                let exit = ExitParams {
                                    trailing_stop_pct: cfg.trailing_pct(),
                                    partial_exit: cfg.partial_exit,
                                    fee_pct: cfg.fill_fee_pct(),
                                };
                                machine.open(plan, exit, bar, &mut equity);
                            }
                            Err(QuantlabError::IndicatorMissing { indicator }) => {
                                tracing::warn!(
                                    %indicator,
                                    timestamp = %bar.timestamp,
                                    "indicator missing for sizing, entry skipped"
                                );
                                stats.skipped_entries += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
        }

        let unrealized = machine
            .position()
            .map(|p| p.unrealized_pnl(bar.close))
            .unwrap_or(0.0);
        equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: equity.equity(),
            mark_to_market: equity.equity() + unrealized,
            regime,
        });
    }

    if config.close_at_end {
        if let Some(last) = bars.last() {
            if let Some(trade) =
                machine.close_remaining(last, last.close, ExitReason::EndOfData, &mut equity)
            {
                *stats.pnl.entry(trade.entry_regime).or_insert(0.0) += trade.net_pnl;
                trades.push(trade);
                if let Some(point) = equity_curve.last_mut() {
                    point.equity = equity.equity();
                    point.mark_to_market = equity.equity();
                }
            }
        }
    }

    let final_equity = equity.equity();
    let metrics = Metrics::compute(
        &equity_curve,
        &trades,
        config.initial_capital,
        final_equity,
        periods_per_year,
    );

    tracing::info!(
        strategy = %strategy.name,
        trades = trades.len(),
        final_equity,
        config_resolutions = cache.resolutions(),
        "backtest finished"
    );

    Ok(BacktestResult {
        strategy: strategy.name.clone(),
        symbol: strategy.symbol.clone(),
        timeframe: strategy.timeframe.clone(),
        initial_capital: config.initial_capital,
        final_equity,
        trades,
        equity_curve,
        regime_stats: stats,
        metrics,
        position_open_at_end: !machine.is_flat(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn default_config_uses_starting_capital() {
        let c = BacktestConfig::default();
        assert!((c.initial_capital - 100.0).abs() < f64::EPSILON);
        assert!(c.close_at_end);
    }

    #[test]
    fn from_config_reads_engine_section() {
        let config =
            FileConfigAdapter::from_string("[engine]\ninitial_capital = 2500\nclose_at_end = no\n")
                .unwrap();
        let c = BacktestConfig::from_config(&config).unwrap();
        assert!((c.initial_capital - 2500.0).abs() < f64::EPSILON);
        assert!(!c.close_at_end);
    }

    #[test]
    fn from_config_defaults_absent_keys() {
        let config = FileConfigAdapter::from_string("[engine]\nmode = balanced\n").unwrap();
        assert_eq!(
            BacktestConfig::from_config(&config).unwrap(),
            BacktestConfig::default()
        );
    }

    #[test]
    fn from_config_rejects_negative_capital() {
        let config =
            FileConfigAdapter::from_string("[engine]\ninitial_capital = -5\n").unwrap();
        assert!(matches!(
            BacktestConfig::from_config(&config),
            Err(QuantlabError::ConfigInvalid { key, .. }) if key == "initial_capital"
        ));
    }
}
