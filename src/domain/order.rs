use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Direction;

/// Action returned to the host's order layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    NoAction,
    EnterLong,
    EnterShort,
}

impl TradeAction {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TradeAction::NoAction => None,
            TradeAction::EnterLong => Some(Direction::Long),
            TradeAction::EnterShort => Some(Direction::Short),
        }
    }
}

impl From<Direction> for TradeAction {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => TradeAction::EnterLong,
            Direction::Short => TradeAction::EnterShort,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::NoAction => write!(f, "NO_ACTION"),
            TradeAction::EnterLong => write!(f, "ENTER_LONG"),
            TradeAction::EnterShort => write!(f, "ENTER_SHORT"),
        }
    }
}

/// Per-bar decision handed back to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub score: f64,
    pub stop: Option<Decimal>,
    pub target: Option<Decimal>,
    pub pattern_id: Option<String>,
}

impl TradeDecision {
    pub fn no_action() -> Self {
        Self {
            action: TradeAction::NoAction,
            score: 0.0,
            stop: None,
            target: None,
            pattern_id: None,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.action != TradeAction::NoAction
    }
}

impl Default for TradeDecision {
    fn default() -> Self {
        Self::no_action()
    }
}

/// Outcome classification reported with a closed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Win,
    Loss,
    Breakeven,
}

impl TradeStatus {
    pub fn from_pnl(pnl: Decimal) -> Self {
        if pnl > Decimal::ZERO {
            TradeStatus::Win
        } else if pnl < Decimal::ZERO {
            TradeStatus::Loss
        } else {
            TradeStatus::Breakeven
        }
    }
}

/// A closed trade, reported back to the pattern service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub pattern_id: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub pnl_points: Decimal,
}

impl TradeResult {
    pub fn status(&self) -> TradeStatus {
        TradeStatus::from_pnl(self.pnl)
    }
}

/// End-of-session report flushed to the pattern service at termination
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub session_id: String,
    pub instrument: String,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub net_pnl: Decimal,
    /// Net P&L keyed by pattern id
    pub per_pattern: BTreeMap<String, Decimal>,
}

impl PerformanceSummary {
    pub fn win_rate(&self) -> Option<f64> {
        if self.trades == 0 {
            None
        } else {
            Some(self.wins as f64 / self.trades as f64)
        }
    }
}
