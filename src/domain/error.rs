//! Domain error types.

/// Top-level error type for quantlab.
#[derive(Debug, thiserror::Error)]
pub enum QuantlabError {
    #[error("strategy '{strategy}' ({regime}): required field {field} is missing after merge")]
    Config {
        strategy: String,
        regime: String,
        field: String,
    },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("strategy '{strategy}': unsupported condition type '{condition_type}' at {location}")]
    UnsupportedCondition {
        strategy: String,
        location: String,
        condition_type: String,
    },

    #[error("strategy '{strategy}': invalid condition at {location}: {reason}")]
    ConditionInvalid {
        strategy: String,
        location: String,
        reason: String,
    },

    #[error("strategy '{strategy}' ({regime}): cannot size with {field}: {reason}")]
    InsufficientConfig {
        strategy: String,
        regime: String,
        field: String,
        reason: String,
    },

    #[error("strategy '{strategy}' ({regime}): position notional is zero")]
    ZeroSize { strategy: String, regime: String },

    #[error("indicator '{indicator}' missing on bar")]
    IndicatorMissing { indicator: String },

    #[error("strategy parse error: {reason}")]
    StrategyParse { reason: String },

    #[error("data load error: {reason}")]
    DataLoad { reason: String },

    #[error("bars out of order at index {index}: timestamps must strictly increase")]
    UnorderedBars { index: usize },

    #[error("bar {index} ({timestamp}): {reason}")]
    InvalidBar {
        index: usize,
        timestamp: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&QuantlabError> for std::process::ExitCode {
    fn from(err: &QuantlabError) -> Self {
        let code: u8 = match err {
            QuantlabError::Io(_) => 1,
            QuantlabError::Config { .. } | QuantlabError::ConfigInvalid { .. } => 2,
            QuantlabError::DataLoad { .. }
            | QuantlabError::UnorderedBars { .. }
            | QuantlabError::InvalidBar { .. }
            | QuantlabError::IndicatorMissing { .. } => 3,
            QuantlabError::UnsupportedCondition { .. }
            | QuantlabError::ConditionInvalid { .. }
            | QuantlabError::StrategyParse { .. } => 4,
            QuantlabError::InsufficientConfig { .. } | QuantlabError::ZeroSize { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
