//! Communication Dispatcher
//!
//! Chooses blocking or fire-and-forget execution for remote calls by session
//! phase. Background calls run in a per-session task group; termination
//! detaches them and only the critical flush is joined, under a timeout.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::ErrorCircuitBreaker;
use crate::domain::SessionPhase;
use crate::error::Result;

/// Execution discipline for one remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Awaited in order before returning
    Blocking,
    /// Launched and detached from the caller
    Background,
}

impl DispatchMode {
    /// Replay is awaited in bar order, live traffic never blocks the bar callback
    pub fn for_phase(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Realtime => DispatchMode::Background,
            _ => DispatchMode::Blocking,
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Blocking => write!(f, "blocking"),
            DispatchMode::Background => write!(f, "background"),
        }
    }
}

/// Result of the bounded critical flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub blocking: u64,
    pub background: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub detached: u64,
    pub flush_timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    blocking: AtomicU64,
    background: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    detached: AtomicU64,
    flush_timeouts: AtomicU64,
}

/// Per-session dispatcher for remote calls
pub struct CommunicationDispatcher {
    breaker: Arc<ErrorCircuitBreaker>,
    tasks: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl CommunicationDispatcher {
    pub fn new(breaker: Arc<ErrorCircuitBreaker>) -> Self {
        Self {
            breaker,
            tasks: Mutex::new(JoinSet::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn breaker(&self) -> &Arc<ErrorCircuitBreaker> {
        &self.breaker
    }

    /// Issue a remote call under the given discipline.
    ///
    /// Blocking calls return their value; background calls always return `None`.
    /// Failures and panics are recorded on the circuit breaker and never returned.
    pub async fn dispatch<F, T>(&self, mode: DispatchMode, label: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match mode {
            DispatchMode::Blocking => {
                self.counters.blocking.fetch_add(1, Ordering::Relaxed);
                run_guarded(label, call, &self.breaker, &self.counters).await
            }
            DispatchMode::Background => {
                self.counters.background.fetch_add(1, Ordering::Relaxed);
                self.spawn(label, call);
                None
            }
        }
    }

    /// Launch a call in the session task group without waiting for it
    pub fn spawn<F, T>(&self, label: &'static str, call: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let breaker = self.breaker.clone();
        let counters = self.counters.clone();
        let task = async move {
            run_guarded(label, call, &breaker, &counters).await;
        };

        match self.tasks.lock() {
            Ok(mut tasks) => {
                // Reap finished tasks so the set does not grow for the whole session
                while let Some(Some(_)) = tasks.join_next().now_or_never() {}
                tasks.spawn(task);
            }
            Err(_) => {
                warn!("Task group lock poisoned, running {} detached", label);
                tokio::spawn(task);
            }
        }
        debug!("Dispatched {} in background", label);
    }

    /// Run the designated critical call and wait for it at most `limit`.
    ///
    /// On timeout the call is left running and shutdown proceeds.
    pub async fn run_critical<F, T>(&self, label: &'static str, limit: Duration, call: F) -> FlushOutcome
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(AssertUnwindSafe(call).catch_unwind());

        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(Ok(Ok(_)))) => {
                self.breaker.record_success();
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!("{} flushed", label);
                FlushOutcome::Completed
            }
            Ok(Ok(Ok(Err(e)))) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("{} failed: {}", label, e);
                FlushOutcome::Failed(e.to_string())
            }
            Ok(Ok(Err(_))) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("{} panicked", label);
                FlushOutcome::Failed("panicked".to_string())
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("{} task failed to join: {}", label, e);
                FlushOutcome::Failed(e.to_string())
            }
            Err(_) => {
                self.counters.flush_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "{} timeout after {}ms, proceeding anyway",
                    label,
                    limit.as_millis()
                );
                FlushOutcome::TimedOut
            }
        }
    }

    /// Number of background tasks not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Wait until every background task (including ones spawned meanwhile) finishes
    pub async fn wait_for_background(&self) {
        loop {
            let mut tasks = match self.tasks.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(_) => return,
            };

            if tasks.is_empty() {
                return;
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Background task failed to join: {}", e);
                }
            }
        }
    }

    /// Release all background tasks from the task group without cancelling them
    pub fn detach_all(&self) -> usize {
        let Ok(mut tasks) = self.tasks.lock() else {
            return 0;
        };

        let count = tasks.len();
        tasks.detach_all();
        self.counters
            .detached
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            debug!("Detached {} in-flight background calls", count);
        }
        count
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            blocking: self.counters.blocking.load(Ordering::Relaxed),
            background: self.counters.background.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            detached: self.counters.detached.load(Ordering::Relaxed),
            flush_timeouts: self.counters.flush_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CommunicationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationDispatcher")
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Await a call, recording its outcome; panics count as failures
async fn run_guarded<F, T>(
    label: &'static str,
    call: F,
    breaker: &ErrorCircuitBreaker,
    counters: &Counters,
) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => {
            breaker.record_success();
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            Some(value)
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            breaker.record_failure(&format!("{}: {}", label, e));
            None
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            breaker.record_failure(&format!("{}: panicked", label));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use std::sync::atomic::AtomicU32;

    fn dispatcher() -> CommunicationDispatcher {
        CommunicationDispatcher::new(Arc::new(ErrorCircuitBreaker::with_threshold(10)))
    }

    #[test]
    fn test_mode_for_phase() {
        assert_eq!(
            DispatchMode::for_phase(SessionPhase::Historical),
            DispatchMode::Blocking
        );
        assert_eq!(
            DispatchMode::for_phase(SessionPhase::Realtime),
            DispatchMode::Background
        );
    }

    #[tokio::test]
    async fn test_blocking_returns_value() {
        let d = dispatcher();
        let value = d
            .dispatch(DispatchMode::Blocking, "call", async { Ok::<_, GuardError>(7) })
            .await;
        assert_eq!(value, Some(7));
        assert_eq!(d.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_blocking_failure_is_recorded_not_returned() {
        let d = dispatcher();
        let value: Option<()> = d
            .dispatch(DispatchMode::Blocking, "call", async {
                Err::<(), _>(GuardError::Timeout { elapsed_ms: 10 })
            })
            .await;
        assert!(value.is_none());
        assert_eq!(d.breaker().error_count(), 1);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let d = dispatcher();
        let value: Option<()> = d
            .dispatch(DispatchMode::Blocking, "call", async {
                if true {
                    panic!("boom");
                }
                Ok::<(), GuardError>(())
            })
            .await;
        assert!(value.is_none());
        assert_eq!(d.breaker().error_count(), 1);
    }

    #[tokio::test]
    async fn test_background_does_not_wait() {
        let d = dispatcher();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let done = Arc::new(AtomicU32::new(0));
        let done_task = done.clone();

        let value = d
            .dispatch(DispatchMode::Background, "call", async move {
                let _ = rx.await;
                done_task.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GuardError>(())
            })
            .await;

        assert!(value.is_none());
        assert_eq!(done.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        d.wait_for_background().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(d.stats().background, 1);
    }

    #[tokio::test]
    async fn test_background_failures_reach_breaker() {
        let d = dispatcher();
        for _ in 0..3 {
            d.dispatch(DispatchMode::Background, "call", async {
                Err::<(), _>(GuardError::ClientUnavailable)
            })
            .await;
        }
        d.wait_for_background().await;
        assert_eq!(d.breaker().error_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_times_out() {
        let d = dispatcher();
        let outcome = d
            .run_critical("summary", Duration::from_secs(5), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, GuardError>(())
            })
            .await;
        assert_eq!(outcome, FlushOutcome::TimedOut);
        assert_eq!(d.stats().flush_timeouts, 1);
    }

    #[tokio::test]
    async fn test_critical_completes() {
        let d = dispatcher();
        let outcome = d
            .run_critical("summary", Duration::from_secs(5), async {
                Ok::<_, GuardError>(())
            })
            .await;
        assert_eq!(outcome, FlushOutcome::Completed);
    }

    #[tokio::test]
    async fn test_detach_all_keeps_tasks_running() {
        let d = dispatcher();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        d.spawn("call", async move {
            let _ = rx.await;
            let _ = done_tx.send(());
            Ok::<_, GuardError>(())
        });

        assert_eq!(d.detach_all(), 1);
        assert_eq!(d.in_flight(), 0);

        tx.send(()).unwrap();
        assert!(done_rx.await.is_ok());
    }
}
