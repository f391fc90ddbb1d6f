use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{MatchingConfig, RemoteConfig};
use crate::domain::{Bar, MatchResult, PerformanceSummary, TradeResult};
use crate::error::Result;

/// Remote pattern-matching and risk-evaluation service.
///
/// Every call can fail or time out; callers decide whether to await it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatternService: Send + Sync {
    /// Push one bar
    async fn send_bar(&self, instrument: &str, bar: &Bar) -> Result<()>;

    /// Bulk-ingest buffered history. Returns the number of bars accepted.
    async fn send_historical_batch(&self, instrument: &str, bars: &[Bar]) -> Result<usize>;

    /// Poll the latest match result for an instrument
    async fn check_signals(&self, instrument: &str) -> Result<MatchResult>;

    async fn send_matching_config(&self, instrument: &str, config: &MatchingConfig) -> Result<()>;

    async fn send_trade_result(&self, instrument: &str, result: &TradeResult) -> Result<()>;

    async fn send_performance_summary(&self, summary: &PerformanceSummary) -> Result<()>;

    /// Returns false when the service answers but reports itself unhealthy
    async fn health_check(&self) -> Result<bool>;

    /// Release transport resources. Later calls fail with `ClientDisposed`.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Builds a service client for one session
pub trait PatternServiceFactory: Send + Sync {
    fn connect(&self, config: &RemoteConfig, session_id: &str) -> Result<Arc<dyn PatternService>>;
}
