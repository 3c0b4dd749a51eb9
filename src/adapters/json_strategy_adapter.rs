//! JSON strategy adapter.
//!
//! Condition tags are checked on the raw document before typed decoding so
//! an unknown type is reported with its exact location instead of a generic
//! serde message.

use crate::domain::condition::Condition;
use crate::domain::error::QuantlabError;
use crate::domain::regime::Regime;
use crate::domain::strategy::StrategyConfig;
use crate::ports::strategy_port::StrategyPort;
use serde_json::Value;
use std::fs;
use std::path::Path;

const RULE_LISTS: [&str; 3] = ["entry_rules", "exit_rules", "filters"];

pub struct JsonStrategyAdapter {
    document: String,
}

impl JsonStrategyAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QuantlabError> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|e| QuantlabError::StrategyParse {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Ok(Self { document })
    }

    pub fn from_string(document: &str) -> Self {
        Self {
            document: document.to_string(),
        }
    }
}

fn parse_error(reason: impl Into<String>) -> QuantlabError {
    QuantlabError::StrategyParse {
        reason: reason.into(),
    }
}

fn check_rule_lists(strategy: &str, prefix: &str, layer: &Value) -> Result<(), QuantlabError> {
    for list in RULE_LISTS {
        let Some(value) = layer.get(list) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let items = value
            .as_array()
            .ok_or_else(|| parse_error(format!("{prefix}.{list} must be an array")))?;
        for (i, item) in items.iter().enumerate() {
            let location = format!("{prefix}.{list}[{i}]");
            let tag = item
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| parse_error(format!("{location}: condition has no type")))?;
            if !Condition::is_known_type(tag) {
                return Err(QuantlabError::UnsupportedCondition {
                    strategy: strategy.to_string(),
                    location,
                    condition_type: tag.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Parses and checks a strategy document.
pub fn parse_strategy(document: &str) -> Result<StrategyConfig, QuantlabError> {
    let root: Value = serde_json::from_str(document).map_err(|e| parse_error(e.to_string()))?;
    if !root.is_object() {
        return Err(parse_error("strategy document must be a JSON object"));
    }
    let name = root
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();

    check_rule_lists(&name, "base", &root)?;
    if let Some(overrides) = root.get("regime_overrides").and_then(Value::as_object) {
        for (key, layer) in overrides {
            key.parse::<Regime>()
                .map_err(|e| parse_error(format!("regime_overrides: {e}")))?;
            check_rule_lists(&name, &format!("regime_overrides.{key}"), layer)?;
        }
    }

    let strategy: StrategyConfig =
        serde_json::from_value(root).map_err(|e| parse_error(format!("strategy '{name}': {e}")))?;

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

    tracing::debug!(strategy = %strategy.name, overrides = strategy.regime_overrides.len(), "strategy loaded");
    Ok(strategy)
}

impl StrategyPort for JsonStrategyAdapter {
    fn load_strategy(&self) -> Result<StrategyConfig, QuantlabError> {
        parse_strategy(&self.document)
    }
}
