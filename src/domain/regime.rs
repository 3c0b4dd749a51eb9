//! Market regime labels assigned per bar by the upstream detector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::TrendingUp, Regime::TrendingDown, Regime::Ranging];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::TrendingUp => "trending_up",
            Regime::TrendingDown => "trending_down",
            Regime::Ranging => "ranging",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trending_up" => Ok(Regime::TrendingUp),
            "trending_down" => Ok(Regime::TrendingDown),
            "ranging" => Ok(Regime::Ranging),
            other => Err(format!(
                "unknown regime '{other}', expected trending_up, trending_down or ranging"
            )),
        }
    }
}
