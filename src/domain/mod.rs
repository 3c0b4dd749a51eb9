//! Core domain types and engine logic.

pub mod bar;
pub mod regime;
pub mod condition;
pub mod condition_eval;
pub mod strategy;
pub mod defaults;
pub mod config_validation;
pub mod config_resolver;
pub mod rule_set;
pub mod position;
pub mod sizing;
pub mod trade_state;
pub mod timeframe;
pub mod backtest;
pub mod metrics;
pub mod error;
