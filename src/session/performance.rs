use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::domain::{PerformanceSummary, TradeResult, TradeStatus};

/// Accumulates closed trades for the end-of-session summary
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    trades: u32,
    wins: u32,
    losses: u32,
    net_pnl: Decimal,
    per_pattern: BTreeMap<String, Decimal>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &TradeResult) {
        self.trades += 1;
        match result.status() {
            TradeStatus::Win => self.wins += 1,
            TradeStatus::Loss => self.losses += 1,
            TradeStatus::Breakeven => {}
        }
        self.net_pnl += result.pnl;
        *self
            .per_pattern
            .entry(result.pattern_id.clone())
            .or_insert(Decimal::ZERO) += result.pnl;
    }

    pub fn trades(&self) -> u32 {
        self.trades
    }

    pub fn net_pnl(&self) -> Decimal {
        self.net_pnl
    }

    pub fn summary(&self, session_id: &str, instrument: &str) -> PerformanceSummary {
        PerformanceSummary {
            session_id: session_id.to_string(),
            instrument: instrument.to_string(),
            trades: self.trades,
            wins: self.wins,
            losses: self.losses,
            net_pnl: self.net_pnl,
            per_pattern: self.per_pattern.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(pattern: &str, pnl: Decimal) -> TradeResult {
        let now = Utc::now();
        TradeResult {
            pattern_id: pattern.to_string(),
            direction: Direction::Long,
            entry_time: now,
            entry_price: dec!(5000),
            exit_time: now,
            exit_price: dec!(5000) + pnl / dec!(50),
            pnl,
            pnl_points: pnl / dec!(50),
        }
    }

    #[test]
    fn test_summary_accumulates() {
        let mut tracker = PerformanceTracker::new();
        tracker.record(&trade("hammer", dec!(125)));
        tracker.record(&trade("hammer", dec!(-50)));
        tracker.record(&trade("engulfing", dec!(0)));

        let summary = tracker.summary("s1", "ES");
        assert_eq!(summary.trades, 3);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.net_pnl, dec!(75));
        assert_eq!(summary.per_pattern.get("hammer"), Some(&dec!(75)));
        assert_eq!(summary.per_pattern.get("engulfing"), Some(&dec!(0)));
        assert_eq!(summary.win_rate(), Some(1.0 / 3.0));
    }

    #[test]
    fn test_clear() {
        let mut tracker = PerformanceTracker::new();
        tracker.record(&trade("hammer", dec!(10)));
        tracker.clear();
        assert_eq!(tracker.trades(), 0);
        assert_eq!(tracker.summary("s", "ES").win_rate(), None);
    }
}
