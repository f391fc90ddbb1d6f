use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Regime tag carried by each pattern match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternRegime {
    /// Continuation setups
    Trend,
    /// Turning-point setups
    Reversal,
    /// Lagging confirmations of another setup
    Confirmation,
    /// Works in any regime
    #[default]
    Neutral,
}

/// One pattern recognised by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub id: String,
    pub name: String,
    /// Grouping used for one-vote-per-category scoring
    pub category: String,
    #[serde(default)]
    pub regime: PatternRegime,
    pub direction: Direction,
    /// Match confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub stop: Option<Decimal>,
    #[serde(default)]
    pub target: Option<Decimal>,
}

/// Remote response to a signal check. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Overall score in [0, 1]
    pub score: f64,
    pub bull_strength: f64,
    pub bear_strength: f64,
    pub matches: Vec<PatternMatch>,
    #[serde(default)]
    pub signal_type: Option<String>,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Highest-confidence match, if any
    pub fn best_match(&self) -> Option<&PatternMatch> {
        self.matches
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub fn pattern_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.id.as_str()).collect()
    }
}
