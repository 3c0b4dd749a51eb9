//! Declarative condition AST.
//!
//! A strategy's `entry_rules`, `exit_rules` and `filters` are lists of
//! [`Condition`]s. Numeric thresholds are [`Param`]s so a strategy can defer to
//! the engine's tuned value through a [`Sentinel`] (`"mode_threshold"`, ...);
//! the config resolver substitutes every sentinel before evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentinel {
    ModeThreshold,
    ModeStop,
    ModeTp,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::ModeThreshold => "mode_threshold",
            Sentinel::ModeStop => "mode_stop",
            Sentinel::ModeTp => "mode_tp",
        }
    }
}

impl FromStr for Sentinel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mode_threshold" => Ok(Sentinel::ModeThreshold),
            "mode_stop" => Ok(Sentinel::ModeStop),
            "mode_tp" => Ok(Sentinel::ModeTp),
            other => Err(format!("unknown sentinel '{other}'")),
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values substituted for sentinels. Supplied by the engine defaults table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SentinelValues {
    pub mode_threshold: f64,
    pub mode_stop: f64,
    pub mode_tp: f64,
}

impl SentinelValues {
    pub fn value_of(&self, sentinel: Sentinel) -> f64 {
        match sentinel {
            Sentinel::ModeThreshold => self.mode_threshold,
            Sentinel::ModeStop => self.mode_stop,
            Sentinel::ModeTp => self.mode_tp,
        }
    }
}

/// A numeric parameter, either literal or deferred to the engine defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParam", into = "RawParam")]
pub enum Param {
    Value(f64),
    Sentinel(Sentinel),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawParam {
    Number(f64),
    Name(String),
}

impl TryFrom<RawParam> for Param {
    type Error = String;

    fn try_from(raw: RawParam) -> Result<Self, Self::Error> {
        match raw {
            RawParam::Number(v) => Ok(Param::Value(v)),
            RawParam::Name(name) => name.parse().map(Param::Sentinel),
        }
    }
}

impl From<Param> for RawParam {
    fn from(p: Param) -> Self {
        match p {
            Param::Value(v) => RawParam::Number(v),
            Param::Sentinel(s) => RawParam::Name(s.as_str().to_string()),
        }
    }
}

impl Param {
    pub fn resolve(&self, sentinels: &SentinelValues) -> f64 {
        match self {
            Param::Value(v) => *v,
            Param::Sentinel(s) => sentinels.value_of(*s),
        }
    }

    /// The literal value, `None` while a sentinel is still unresolved.
    pub fn value(&self) -> Option<f64> {
        match self {
            Param::Value(v) => Some(*v),
            Param::Sentinel(_) => None,
        }
    }

    fn resolved(&self, sentinels: &SentinelValues) -> Param {
        Param::Value(self.resolve(sentinels))
    }

    fn mirrored(&self) -> Param {
        match self {
            Param::Value(v) => Param::Value(100.0 - v),
            Param::Sentinel(_) => *self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    #[default]
    Up,
    Down,
}

impl CrossDirection {
    pub fn flipped(self) -> Self {
        match self {
            CrossDirection::Up => CrossDirection::Down,
            CrossDirection::Down => CrossDirection::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullbackSide {
    Long,
    Short,
}

pub const DEFAULT_BB_STD: f64 = 2.0;
pub const DEFAULT_EMA_PERIOD: u32 = 150;
pub const DEFAULT_VOLUME_ZSCORE: f64 = 2.0;
/// Fraction of the half band counted as "near" a Bollinger band.
pub const NEAR_BAND_FRACTION: f64 = 0.1;

fn default_ema_period() -> u32 {
    DEFAULT_EMA_PERIOD
}
fn default_fast() -> u32 {
    50
}
fn default_pullback_period() -> u32 {
    50
}
fn default_expansion() -> f64 {
    1.5
}
fn default_contraction() -> f64 {
    0.75
}
fn default_pullback_pct() -> f64 {
    0.02
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    MacdCross {
        #[serde(default)]
        direction: CrossDirection,
    },
    EmaCross {
        #[serde(default = "default_fast")]
        fast: u32,
        #[serde(default = "default_ema_period")]
        slow: u32,
        #[serde(default)]
        direction: CrossDirection,
    },
    StochasticCross {
        #[serde(default)]
        direction: CrossDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<Param>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<Param>,
    },
    Adx {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<Param>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<Param>,
    },
    Rsi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<Param>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<Param>,
    },
    PriceAboveEma {
        #[serde(default = "default_ema_period")]
        period: u32,
    },
    PriceBelowEma {
        #[serde(default = "default_ema_period")]
        period: u32,
    },
    PriceAboveBb {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        std: Option<f64>,
    },
    PriceBelowBb {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        std: Option<f64>,
    },
    PriceNearBbLower {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        std: Option<f64>,
    },
    PriceNearBbUpper {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        std: Option<f64>,
    },
    PriceCrossesMidBb,
    PriceCrossesMidBbDown,
    VolumeZscore {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<Param>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<Param>,
    },
    BreakoutHigh {
        #[serde(default)]
        buffer_pct: f64,
    },
    BreakoutLow {
        #[serde(default)]
        buffer_pct: f64,
    },
    VolatilityExpansion {
        #[serde(default = "default_expansion")]
        multiplier: f64,
    },
    RangeContraction {
        #[serde(default = "default_contraction")]
        multiplier: f64,
    },
    TrendPullback {
        #[serde(default = "default_pullback_period")]
        period: u32,
        #[serde(default = "default_pullback_pct")]
        max_pullback_pct: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<PullbackSide>,
    },
}

impl Condition {
    /// Every `type` tag the engine understands.
    pub const KNOWN_TYPES: [&'static str; 19] = [
        "macd_cross",
        "ema_cross",
        "stochastic_cross",
        "adx",
        "rsi",
        "price_above_ema",
        "price_below_ema",
        "price_above_bb",
        "price_below_bb",
        "price_near_bb_lower",
        "price_near_bb_upper",
        "price_crosses_mid_bb",
        "price_crosses_mid_bb_down",
        "volume_zscore",
        "breakout_high",
        "breakout_low",
        "volatility_expansion",
        "range_contraction",
        "trend_pullback",
    ];

    pub fn is_known_type(tag: &str) -> bool {
        Self::KNOWN_TYPES.contains(&tag)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Condition::MacdCross { .. } => "macd_cross",
            Condition::EmaCross { .. } => "ema_cross",
            Condition::StochasticCross { .. } => "stochastic_cross",
            Condition::Adx { .. } => "adx",
            Condition::Rsi { .. } => "rsi",
            Condition::PriceAboveEma { .. } => "price_above_ema",
            Condition::PriceBelowEma { .. } => "price_below_ema",
            Condition::PriceAboveBb { .. } => "price_above_bb",
            Condition::PriceBelowBb { .. } => "price_below_bb",
            Condition::PriceNearBbLower { .. } => "price_near_bb_lower",
            Condition::PriceNearBbUpper { .. } => "price_near_bb_upper",
            Condition::PriceCrossesMidBb => "price_crosses_mid_bb",
            Condition::PriceCrossesMidBbDown => "price_crosses_mid_bb_down",
            Condition::VolumeZscore { .. } => "volume_zscore",
            Condition::BreakoutHigh { .. } => "breakout_high",
            Condition::BreakoutLow { .. } => "breakout_low",
            Condition::VolatilityExpansion { .. } => "volatility_expansion",
            Condition::RangeContraction { .. } => "range_contraction",
            Condition::TrendPullback { .. } => "trend_pullback",
        }
    }

    /// Cross conditions compare against the previous bar.
    pub fn needs_previous_bar(&self) -> bool {
        matches!(
            self,
            Condition::MacdCross { .. }
                | Condition::EmaCross { .. }
                | Condition::StochasticCross { .. }
                | Condition::PriceCrossesMidBb
                | Condition::PriceCrossesMidBbDown
                | Condition::VolatilityExpansion { .. }
                | Condition::RangeContraction { .. }
        )
    }

    /// Rejects parameter combinations that could never evaluate meaningfully.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::Rsi {
                above: None,
                below: None,
            } => Err("rsi requires 'above' or 'below'".into()),
            Condition::EmaCross { fast, slow, .. } => {
                if *fast == 0 || *slow == 0 {
                    Err("ema_cross periods must be positive".into())
                } else if fast == slow {
                    Err("ema_cross requires distinct fast and slow periods".into())
                } else {
                    Ok(())
                }
            }
            Condition::PriceAboveEma { period }
            | Condition::PriceBelowEma { period }
            | Condition::TrendPullback { period, .. }
                if *period == 0 =>
            {
                Err(format!("{} period must be positive", self.type_name()))
            }
            Condition::PriceAboveBb { std: Some(s) }
            | Condition::PriceBelowBb { std: Some(s) }
            | Condition::PriceNearBbLower { std: Some(s) }
            | Condition::PriceNearBbUpper { std: Some(s) }
                if *s <= 0.0 =>
            {
                Err(format!("{} std must be positive", self.type_name()))
            }
            Condition::VolatilityExpansion { multiplier }
            | Condition::RangeContraction { multiplier }
                if *multiplier <= 0.0 =>
            {
                Err(format!("{} multiplier must be positive", self.type_name()))
            }
            Condition::TrendPullback {
                max_pullback_pct, ..
            } if *max_pullback_pct < 0.0 => {
                Err("trend_pullback max_pullback_pct must be non-negative".into())
            }
            Condition::BreakoutHigh { buffer_pct } | Condition::BreakoutLow { buffer_pct }
                if *buffer_pct < 0.0 =>
            {
                Err(format!("{} buffer_pct must be non-negative", self.type_name()))
            }
            Condition::Rsi {
                above: Some(Param::Value(a)),
                below: Some(Param::Value(b)),
            }
            | Condition::Adx {
                above: Some(Param::Value(a)),
                below: Some(Param::Value(b)),
            }
            | Condition::VolumeZscore {
                above: Some(Param::Value(a)),
                below: Some(Param::Value(b)),
            }
            | Condition::StochasticCross {
                above: Some(Param::Value(a)),
                below: Some(Param::Value(b)),
                ..
            } if a >= b => Err(format!(
                "{} band is empty: above {a} must be less than below {b}",
                self.type_name()
            )),
            _ => Ok(()),
        }
    }

    /// Substitutes all sentinels and fills implicit thresholds.
    ///
    /// `adx` without bounds means `above: mode_threshold`; `volume_zscore`
    /// without bounds means `above: 2.0`.
    pub fn resolve_sentinels(&self, sentinels: &SentinelValues) -> Condition {
        let r = |p: &Option<Param>| p.map(|v| v.resolved(sentinels));
        match self {
            Condition::Adx {
                above: None,
                below: None,
            } => Condition::Adx {
                above: Some(Param::Value(sentinels.mode_threshold)),
                below: None,
            },
            Condition::Adx { above, below } => Condition::Adx {
                above: r(above),
                below: r(below),
            },
            Condition::Rsi { above, below } => Condition::Rsi {
                above: r(above),
                below: r(below),
            },
            Condition::StochasticCross {
                direction,
                above,
                below,
            } => Condition::StochasticCross {
                direction: *direction,
                above: r(above),
                below: r(below),
            },
            Condition::VolumeZscore {
                above: None,
                below: None,
            } => Condition::VolumeZscore {
                above: Some(Param::Value(DEFAULT_VOLUME_ZSCORE)),
                below: None,
            },
            Condition::VolumeZscore { above, below } => Condition::VolumeZscore {
                above: r(above),
                below: r(below),
            },
            other => other.clone(),
        }
    }

    /// The mirror-image condition used for short-side evaluation.
    ///
    /// Direction-neutral conditions (`adx`, `volume_zscore`) are returned unchanged.
    pub fn inverted(&self) -> Condition {
        match self {
            Condition::Rsi { above, below } => Condition::Rsi {
                above: below.map(|p| p.mirrored()),
                below: above.map(|p| p.mirrored()),
            },
            Condition::MacdCross { direction } => Condition::MacdCross {
                direction: direction.flipped(),
            },
            Condition::EmaCross {
                fast,
                slow,
                direction,
            } => Condition::EmaCross {
                fast: *fast,
                slow: *slow,
                direction: direction.flipped(),
            },
            Condition::StochasticCross {
                direction,
                above,
                below,
            } => Condition::StochasticCross {
                direction: direction.flipped(),
                above: below.map(|p| p.mirrored()),
                below: above.map(|p| p.mirrored()),
            },
            Condition::PriceAboveEma { period } => Condition::PriceBelowEma { period: *period },
            Condition::PriceBelowEma { period } => Condition::PriceAboveEma { period: *period },
            Condition::PriceAboveBb { std } => Condition::PriceBelowBb { std: *std },
            Condition::PriceBelowBb { std } => Condition::PriceAboveBb { std: *std },
            Condition::PriceNearBbLower { std } => Condition::PriceNearBbUpper { std: *std },
            Condition::PriceNearBbUpper { std } => Condition::PriceNearBbLower { std: *std },
            Condition::PriceCrossesMidBb => Condition::PriceCrossesMidBbDown,
            Condition::PriceCrossesMidBbDown => Condition::PriceCrossesMidBb,
            Condition::BreakoutHigh { buffer_pct } => Condition::BreakoutLow {
                buffer_pct: *buffer_pct,
            },
            Condition::BreakoutLow { buffer_pct } => Condition::BreakoutHigh {
                buffer_pct: *buffer_pct,
            },
            Condition::VolatilityExpansion { multiplier } => Condition::RangeContraction {
                multiplier: *multiplier,
            },
            Condition::RangeContraction { multiplier } => Condition::VolatilityExpansion {
                multiplier: *multiplier,
            },
            Condition::TrendPullback {
                period,
                max_pullback_pct,
                direction,
            } => Condition::TrendPullback {
                period: *period,
                max_pullback_pct: *max_pullback_pct,
                direction: direction.map(|d| match d {
                    PullbackSide::Long => PullbackSide::Short,
                    PullbackSide::Short => PullbackSide::Long,
                }),
            },
            Condition::Adx { .. } | Condition::VolumeZscore { .. } => self.clone(),
        }
    }
}

pub fn ema_key(period: u32) -> String {
    format!("ema_{period}")
}

/// `bb_upper`, `bb_mid` or `bb_lower`, suffixed with the band width when it
/// is not the default 2.0 (`bb_lower_2.5`).
pub fn bb_key(band: &str, std: Option<f64>) -> String {
    match std {
        Some(s) if (s - DEFAULT_BB_STD).abs() > f64::EPSILON => format!("bb_{band}_{s}"),
        _ => format!("bb_{band}"),
    }
}
