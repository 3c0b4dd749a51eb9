//! Engine configuration validation.
//!
//! Validates every key of an engine defaults file before a run starts.
//! Absent keys are valid; present keys must parse and be in range.

use crate::domain::condition::{Param, Sentinel};
use crate::domain::error::QuantlabError;
use crate::domain::strategy::{DirectionPolicy, SizingMode};
use crate::ports::config_port::ConfigPort;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    validate_mode(config)?;
    validate_initial_capital(config)?;
    validate_close_at_end(config)?;
    Ok(())
}

pub fn validate_defaults_config(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    validate_direction(config)?;
    validate_sizing(config)?;
    validate_size_fields(config)?;
    validate_risk(config)?;
    validate_trailing_stop(config)?;
    validate_partial_exit(config)?;
    validate_fees(config)?;
    validate_sentinels(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> QuantlabError {
    QuantlabError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Reads an optional float; a present value that does not parse is an error.
pub fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, QuantlabError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

/// Like [`read_f64`] but also accepts a sentinel name.
pub fn read_param(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<Param>, QuantlabError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => {
            let raw = raw.trim();
            if let Ok(v) = raw.parse::<f64>() {
                return Ok(Some(Param::Value(v)));
            }
            raw.parse::<Sentinel>()
                .map(|s| Some(Param::Sentinel(s)))
                .map_err(|e| invalid(section, key, e))
        }
    }
}

fn validate_mode(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(raw) = config.get_string("engine", "mode") {
        match raw.trim().to_ascii_lowercase().as_str() {
            "conservative" | "balanced" | "aggressive" => {}
            _ => {
                return Err(invalid(
                    "engine",
                    "mode",
                    "mode must be conservative, balanced or aggressive",
                ));
            }
        }
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(value) = read_f64(config, "engine", "initial_capital")? {
        if value <= 0.0 {
            return Err(invalid(
                "engine",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
    }
    Ok(())
}

fn validate_close_at_end(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(raw) = config.get_string("engine", "close_at_end") {
        let parsed = config.get_bool("engine", "close_at_end", true)
            == config.get_bool("engine", "close_at_end", false);
        if !parsed {
            return Err(invalid(
                "engine",
                "close_at_end",
                format!("'{raw}' is not a boolean"),
            ));
        }
    }
    Ok(())
}

fn validate_direction(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(raw) = config.get_string("defaults", "direction") {
        raw.parse::<DirectionPolicy>()
            .map_err(|e| invalid("defaults", "direction", e))?;
    }
    Ok(())
}

fn validate_sizing(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(raw) = config.get_string("defaults", "sizing") {
        raw.parse::<SizingMode>()
            .map_err(|e| invalid("defaults", "sizing", e))?;
    }
    Ok(())
}

fn validate_size_fields(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    for key in ["equity_pct", "fixed_size", "atr_multiplier"] {
        if let Some(value) = read_f64(config, "defaults", key)? {
            if value <= 0.0 {
                return Err(invalid("defaults", key, format!("{key} must be positive")));
            }
        }
    }
    Ok(())
}

fn validate_risk(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    for key in ["risk_pct", "rr"] {
        if let Some(Param::Value(value)) = read_param(config, "defaults", key)? {
            if value <= 0.0 {
                return Err(invalid("defaults", key, format!("{key} must be positive")));
            }
        }
    }
    Ok(())
}

fn validate_trailing_stop(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(value) = read_f64(config, "defaults", "trailing_stop_pct")? {
        if !(0.0..100.0).contains(&value) {
            return Err(invalid(
                "defaults",
                "trailing_stop_pct",
                "trailing_stop_pct must be in [0, 100)",
            ));
        }
    }
    Ok(())
}

fn validate_partial_exit(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    if let Some(value) = read_f64(config, "defaults", "partial_exit")? {
        if value <= 0.0 || value >= 1.0 {
            return Err(invalid(
                "defaults",
                "partial_exit",
                "partial_exit must be a fraction between 0 and 1",
            ));
        }
    }
    Ok(())
}

fn validate_fees(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    for key in ["taker_fee_pct", "maker_fee_pct"] {
        if let Some(value) = read_f64(config, "defaults", key)? {
            if value < 0.0 {
                return Err(invalid(
                    "defaults",
                    key,
                    format!("{key} must be non-negative"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_sentinels(config: &dyn ConfigPort) -> Result<(), QuantlabError> {
    read_f64(config, "sentinels", "mode_threshold")?;
    for key in ["mode_stop", "mode_tp"] {
        if let Some(value) = read_f64(config, "sentinels", key)? {
            if value <= 0.0 {
                return Err(invalid("sentinels", key, format!("{key} must be positive")));
            }
        }
    }
    Ok(())
}
