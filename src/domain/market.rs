use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Get the opposite direction
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a bar came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarInterval {
    /// Replayed from saved data
    Historical,
    /// Live intraday update
    Intraday,
}

impl BarInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::Historical => "historical",
            BarInterval::Intraday => "intraday",
        }
    }
}

/// Immutable OHLCV record delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub interval: BarInterval,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        interval: BarInterval,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            interval,
        }
    }

    /// Reject bars whose OHLC values cannot describe a real candle
    pub fn validate(&self) -> Result<()> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(GuardError::InvalidBar(format!(
                "non-positive price at {}",
                self.timestamp
            )));
        }

        if self.high < self.low || self.high < self.open.max(self.close) {
            return Err(GuardError::InvalidBar(format!(
                "high {} below body at {}",
                self.high, self.timestamp
            )));
        }

        if self.low > self.open.min(self.close) {
            return Err(GuardError::InvalidBar(format!(
                "low {} above body at {}",
                self.low, self.timestamp
            )));
        }

        Ok(())
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Host-side account view captured for each bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Currently open positions for this session
    pub open_positions: u32,
    /// Unrealized P&L of the current open position (negative = loss)
    pub unrealized_pnl: Decimal,
    /// Running session P&L supplied by the host (negative = loss)
    pub session_pnl: Decimal,
}

impl AccountSnapshot {
    pub fn flat(session_pnl: Decimal) -> Self {
        Self {
            open_positions: 0,
            unrealized_pnl: Decimal::ZERO,
            session_pnl,
        }
    }
}

/// Reduce a host instrument code to its root symbol ("ES 03-25" -> "ES")
pub fn root_symbol(instrument: &str) -> &str {
    instrument.split_whitespace().next().unwrap_or(instrument)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar::new(Utc::now(), open, high, low, close, 10, BarInterval::Intraday)
    }

    #[test]
    fn test_valid_bar() {
        assert!(bar(dec!(100), dec!(101), dec!(99), dec!(100.5)).validate().is_ok());
    }

    #[test]
    fn test_high_below_close_rejected() {
        assert!(bar(dec!(100), dec!(100.2), dec!(99), dec!(100.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_low_above_open_rejected() {
        assert!(bar(dec!(100), dec!(101), dec!(100.1), dec!(100.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_zero_price_rejected() {
        assert!(bar(dec!(0), dec!(101), dec!(0), dec!(100)).validate().is_err());
    }

    #[test]
    fn test_root_symbol() {
        assert_eq!(root_symbol("ES 03-25"), "ES");
        assert_eq!(root_symbol("NQ"), "NQ");
        assert_eq!(root_symbol(""), "");
    }

    #[test]
    fn test_interval_serde() {
        let json = serde_json::to_string(&BarInterval::Historical).unwrap();
        assert_eq!(json, "\"historical\"");
    }
}
