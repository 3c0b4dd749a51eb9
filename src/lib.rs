//! quantlab: regime-aware single-instrument strategy backtester.
//!
//! Hexagonal architecture: the engine lives in [`domain`], port traits in
//! [`ports`], file-backed implementations in [`adapters`] and the command
//! line front end in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
