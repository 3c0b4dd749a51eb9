//! Port traits at the engine boundary.

pub mod bar_port;
pub mod config_port;
pub mod strategy_port;
