//! At-most-once historical backfill
//!
//! The attempt flag is claimed when the backfill is triggered, so repeated
//! triggers never issue a second bulk call. Failure does not re-arm it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::HistoricalBuffer;
use crate::adapters::PatternService;
use crate::coordination::{CommunicationDispatcher, DispatchMode};

/// What a trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillTrigger {
    /// Bulk call issued with this many bars
    Started { bars: usize },
    /// Nothing buffered; marked complete without a call
    Empty,
    /// A previous trigger already claimed the attempt
    AlreadyAttempted,
}

#[derive(Debug, Default)]
struct BackfillState {
    attempted: AtomicBool,
    completed: AtomicBool,
    succeeded: AtomicBool,
    bars_sent: AtomicUsize,
}

/// Drains the historical buffer into the remote service once per session
#[derive(Debug, Clone, Default)]
pub struct BackfillCoordinator {
    state: Arc<BackfillState>,
}

impl BackfillCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attempted(&self) -> bool {
        self.state.attempted.load(Ordering::SeqCst)
    }

    /// The attempt has resolved, successfully or not
    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> bool {
        self.state.succeeded.load(Ordering::SeqCst)
    }

    pub fn bars_sent(&self) -> usize {
        self.state.bars_sent.load(Ordering::SeqCst)
    }

    /// Drain `buffer` through a single bulk call, at most once per session
    pub async fn run_once(
        &self,
        buffer: &mut HistoricalBuffer,
        instrument: &str,
        client: Arc<dyn PatternService>,
        dispatcher: &CommunicationDispatcher,
        mode: DispatchMode,
    ) -> BackfillTrigger {
        if self.state.attempted.swap(true, Ordering::SeqCst) {
            info!("Backfill already attempted for {}, skipping", instrument);
            return BackfillTrigger::AlreadyAttempted;
        }

        if buffer.is_empty() {
            info!("Backfill for {}: buffer empty, nothing to send", instrument);
            self.state.completed.store(true, Ordering::SeqCst);
            return BackfillTrigger::Empty;
        }

        let bars = buffer.drain();
        let count = bars.len();
        let instrument = instrument.to_string();
        let state = self.state.clone();

        info!("Backfill for {}: sending {} bars ({})", instrument, count, mode);

        dispatcher
            .dispatch(mode, "historical backfill", async move {
                let outcome = client.send_historical_batch(&instrument, &bars).await;
                match &outcome {
                    Ok(sent) => {
                        state.succeeded.store(true, Ordering::SeqCst);
                        state.bars_sent.store(*sent, Ordering::SeqCst);
                        info!("Backfill for {} complete: {} bars accepted", instrument, sent);
                    }
                    Err(e) => warn!("Backfill for {} failed, not retrying: {}", instrument, e),
                }
                state.completed.store(true, Ordering::SeqCst);
                outcome
            })
            .await;

        BackfillTrigger::Started { bars: count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockPatternService;
    use crate::coordination::ErrorCircuitBreaker;
    use crate::domain::{Bar, BarInterval};
    use crate::error::GuardError;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn filled(n: usize) -> HistoricalBuffer {
        let mut buffer = HistoricalBuffer::new(200);
        let start = Utc::now();
        for i in 0..n {
            buffer.push(Bar::new(
                start + Duration::minutes(i as i64),
                dec!(100),
                dec!(101),
                dec!(99),
                dec!(100),
                10,
                BarInterval::Historical,
            ));
        }
        buffer
    }

    fn dispatcher() -> CommunicationDispatcher {
        CommunicationDispatcher::new(Arc::new(ErrorCircuitBreaker::with_threshold(10)))
    }

    #[tokio::test]
    async fn test_runs_at_most_once() {
        let mut mock = MockPatternService::new();
        mock.expect_send_historical_batch()
            .times(1)
            .returning(|_, bars| Ok(bars.len()));
        let client: Arc<dyn PatternService> = Arc::new(mock);

        let coordinator = BackfillCoordinator::new();
        let dispatcher = dispatcher();
        let mut buffer = filled(20);

        let first = coordinator
            .run_once(&mut buffer, "ES", client.clone(), &dispatcher, DispatchMode::Background)
            .await;
        assert_eq!(first, BackfillTrigger::Started { bars: 20 });

        let second = coordinator
            .run_once(&mut buffer, "ES", client.clone(), &dispatcher, DispatchMode::Background)
            .await;
        assert_eq!(second, BackfillTrigger::AlreadyAttempted);

        dispatcher.wait_for_background().await;
        assert!(coordinator.is_completed());
        assert!(coordinator.succeeded());
        assert_eq!(coordinator.bars_sent(), 20);
    }

    #[tokio::test]
    async fn test_failure_marks_complete_without_retry() {
        let mut mock = MockPatternService::new();
        mock.expect_send_historical_batch()
            .times(1)
            .returning(|_, _| Err(GuardError::Timeout { elapsed_ms: 10_000 }));
        let client: Arc<dyn PatternService> = Arc::new(mock);

        let coordinator = BackfillCoordinator::new();
        let dispatcher = dispatcher();
        let mut buffer = filled(5);

        coordinator
            .run_once(&mut buffer, "ES", client.clone(), &dispatcher, DispatchMode::Blocking)
            .await;
        assert!(coordinator.is_completed());
        assert!(!coordinator.succeeded());
        assert_eq!(dispatcher.breaker().error_count(), 1);

        // A new buffer does not re-arm the attempt
        let mut refilled = filled(5);
        let again = coordinator
            .run_once(&mut refilled, "ES", client, &dispatcher, DispatchMode::Blocking)
            .await;
        assert_eq!(again, BackfillTrigger::AlreadyAttempted);
        assert_eq!(refilled.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_buffer_makes_no_call() {
        let mut mock = MockPatternService::new();
        mock.expect_send_historical_batch().never();
        let client: Arc<dyn PatternService> = Arc::new(mock);

        let coordinator = BackfillCoordinator::new();
        let mut buffer = HistoricalBuffer::new(200);
        let trigger = coordinator
            .run_once(&mut buffer, "ES", client, &dispatcher(), DispatchMode::Blocking)
            .await;

        assert_eq!(trigger, BackfillTrigger::Empty);
        assert!(coordinator.is_completed());
    }
}
