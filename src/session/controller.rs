//! Session controller
//!
//! Owns the phase state machine and wires the breaker, cooldown guard, signal
//! gate, historical buffer and backfill coordinator around the remote client.
//! Nothing raised inside a bar callback reaches the host: failures and panics
//! become `NoAction` and count against the circuit breaker.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{BackfillCoordinator, BackfillTrigger, HistoricalBuffer, PerformanceTracker, SessionStatus};
use crate::adapters::{PatternService, PatternServiceFactory};
use crate::config::AppConfig;
use crate::coordination::{
    CommunicationDispatcher, CooldownContext, CooldownGuard, DispatchMode, DispatchStats,
    ErrorCircuitBreaker, FlushOutcome,
};
use crate::domain::{
    AccountSnapshot, Bar, PhaseTransition, SessionPhase, TradeDecision, TradeResult,
};
use crate::error::{GuardError, Result};
use crate::services::SignalCache;
use crate::strategy::{AdmissionContext, SignalFeatures, SignalGate};

/// What the one-shot teardown did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminationReport {
    /// Outcome of the final summary flush, if one was attempted
    pub flush: Option<FlushOutcome>,
    pub client_disposed: bool,
    pub cache_released: bool,
    /// The release emptied the shared cache
    pub cache_reset: bool,
    pub detached_tasks: usize,
}

/// Lifecycle owner for one strategy-instrument session
pub struct SessionController {
    session_id: String,
    instrument: String,
    config: AppConfig,
    phase: SessionPhase,
    transitions: Vec<PhaseTransition>,
    factory: Arc<dyn PatternServiceFactory>,
    client: Option<Arc<dyn PatternService>>,
    cache: Arc<SignalCache>,
    cache_attached: bool,
    breaker: Arc<ErrorCircuitBreaker>,
    dispatcher: CommunicationDispatcher,
    cooldown: CooldownGuard,
    gate: SignalGate,
    buffer: HistoricalBuffer,
    backfill: BackfillCoordinator,
    tracker: PerformanceTracker,
    /// Effective "use remote" toggle for the current phase
    remote_enabled: bool,
    connected: Arc<AtomicBool>,
    terminated: AtomicBool,
    /// Receipt time of the last cached result handed to the gate
    last_signal_at: Option<DateTime<Utc>>,
    bars_processed: u64,
    entries_proposed: u64,
}

impl SessionController {
    pub fn new(
        session_id: impl Into<String>,
        instrument: impl Into<String>,
        config: AppConfig,
        factory: Arc<dyn PatternServiceFactory>,
        cache: Arc<SignalCache>,
    ) -> Self {
        let breaker = Arc::new(ErrorCircuitBreaker::new(&config.breaker));

        Self {
            session_id: session_id.into(),
            instrument: instrument.into(),
            phase: SessionPhase::Created,
            transitions: Vec::new(),
            factory,
            client: None,
            cache,
            cache_attached: false,
            dispatcher: CommunicationDispatcher::new(breaker.clone()),
            breaker,
            cooldown: CooldownGuard::new(config.cooldown.clone()),
            gate: SignalGate::new(&config.gate),
            buffer: HistoricalBuffer::new(config.session.buffer_capacity),
            backfill: BackfillCoordinator::new(),
            tracker: PerformanceTracker::new(),
            remote_enabled: false,
            connected: Arc::new(AtomicBool::new(false)),
            terminated: AtomicBool::new(false),
            last_signal_at: None,
            bars_processed: 0,
            entries_proposed: 0,
            config,
        }
    }

    /// Generate a fresh session identifier
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn error_count(&self) -> u32 {
        self.breaker.error_count()
    }

    pub fn breaker(&self) -> &ErrorCircuitBreaker {
        &self.breaker
    }

    pub fn backfill(&self) -> &BackfillCoordinator {
        &self.backfill
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Client exists, last health check passed and the breaker is closed
    pub fn is_healthy(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst) && !self.breaker.is_tripped()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            instrument: self.instrument.clone(),
            phase: self.phase,
            remote_enabled: self.remote_enabled,
            connected: self.connected.load(Ordering::SeqCst),
            error_count: self.breaker.error_count(),
            breaker_tripped: self.breaker.is_tripped(),
            cooldown_active: self.cooldown.is_active(),
            backfill_completed: self.backfill.is_completed(),
            backfill_succeeded: self.backfill.succeeded(),
            buffered_bars: self.buffer.len(),
            bars_processed: self.bars_processed,
            entries_proposed: self.entries_proposed,
        }
    }

    /// Wait for in-flight background calls to finish
    pub async fn settle(&self) {
        self.dispatcher.wait_for_background().await;
    }

    /// Move to `to`. Returns false if already there.
    fn transition(&mut self, to: SessionPhase) -> Result<bool> {
        if self.phase == to {
            debug!("Session {} already in {}, ignoring", self.session_id, to);
            return Ok(false);
        }

        if !self.phase.can_transition_to(to) {
            return Err(GuardError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }

        info!("Session {}: {} -> {}", self.session_id, self.phase, to);
        self.transitions.push(PhaseTransition::new(self.phase, to));
        self.phase = to;
        Ok(true)
    }

    /// Client usable for remote calls in the current phase
    fn remote_client(&self) -> Option<Arc<dyn PatternService>> {
        if !self.remote_enabled || self.breaker.is_tripped() {
            return None;
        }
        self.client.clone()
    }

    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::for_phase(self.phase)
    }

    // =========================================================================
    // Phase transitions
    // =========================================================================

    /// Construct the remote client and send the matching config.
    ///
    /// A client that cannot be built leaves the session in degraded no-signal mode.
    pub async fn on_config_loaded(&mut self) -> Result<()> {
        if !self.transition(SessionPhase::ConfigLoaded)? {
            return Ok(());
        }

        self.cache.attach(&self.instrument);
        self.cache_attached = true;

        if !self.config.remote.enabled {
            info!("Remote usage disabled; session {} runs without signals", self.session_id);
            return Ok(());
        }

        match self.factory.connect(&self.config.remote, &self.session_id) {
            Ok(client) => {
                self.client = Some(client);
                self.remote_enabled = true;
            }
            Err(e) => {
                error!(
                    "Pattern service client unavailable for session {}, continuing degraded: {}",
                    self.session_id, e
                );
                return Ok(());
            }
        }

        self.send_matching_config().await;
        self.check_health().await;
        Ok(())
    }

    async fn send_matching_config(&self) {
        let Some(client) = self.remote_client() else {
            return;
        };
        let instrument = self.instrument.clone();
        let matching = self.config.matching.clone();

        self.dispatcher
            .dispatch(self.dispatch_mode(), "matching config", async move {
                client.send_matching_config(&instrument, &matching).await
            })
            .await;
    }

    async fn check_health(&self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let connected = self.connected.clone();

        let healthy = self
            .dispatcher
            .dispatch(self.dispatch_mode(), "health check", async move {
                let healthy = client.health_check().await?;
                connected.store(healthy, Ordering::SeqCst);
                Ok(healthy)
            })
            .await;

        match healthy {
            Some(true) => info!("Pattern service healthy"),
            Some(false) => warn!("Pattern service reported unhealthy"),
            None => {}
        }
    }

    /// Replay phase: remote usage is forced off unless sync replay is configured,
    /// and the cooldown guard is disabled.
    pub async fn on_historical_enter(&mut self) -> Result<()> {
        if !self.transition(SessionPhase::Historical)? {
            return Ok(());
        }

        self.cooldown.set_enabled(false);

        if self.config.remote.sync_replay && self.remote_enabled {
            info!("Historical replay will await every remote call in bar order");
        } else if self.remote_enabled {
            self.remote_enabled = false;
            info!("Remote usage forced off for historical replay");
        }
        Ok(())
    }

    /// Live phase: re-enables the remote and triggers the one-shot backfill in
    /// the background. Entry never waits for the backfill.
    pub async fn on_realtime_enter(&mut self) -> Result<Option<BackfillTrigger>> {
        if self.transition(SessionPhase::Realtime)? {
            self.remote_enabled = self.config.remote.enabled && self.client.is_some();
            self.cooldown.set_enabled(true);
        }

        Ok(self.maybe_backfill().await)
    }

    async fn maybe_backfill(&mut self) -> Option<BackfillTrigger> {
        let Some(client) = self.remote_client() else {
            debug!("Backfill skipped: remote unavailable");
            return None;
        };

        let mode = self.dispatch_mode();
        let trigger = self
            .backfill
            .run_once(&mut self.buffer, &self.instrument, client, &self.dispatcher, mode)
            .await;
        Some(trigger)
    }

    // =========================================================================
    // Per-bar path
    // =========================================================================

    /// Evaluate one bar. Never fails: any error or panic yields `NoAction`.
    pub async fn on_bar_update(&mut self, bar: &Bar, account: &AccountSnapshot) -> TradeDecision {
        if !self.phase.accepts_bars() {
            debug!("Ignoring bar in phase {}", self.phase);
            return TradeDecision::no_action();
        }

        match AssertUnwindSafe(self.process_bar(bar, account))
            .catch_unwind()
            .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                error!("Bar {} failed: {}", bar.timestamp, e);
                self.breaker.record_failure(&e.to_string());
                TradeDecision::no_action()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Bar {} panicked: {}", bar.timestamp, message);
                self.breaker.record_failure(&format!("panic: {}", message));
                TradeDecision::no_action()
            }
        }
    }

    async fn process_bar(&mut self, bar: &Bar, account: &AccountSnapshot) -> Result<TradeDecision> {
        bar.validate()?;
        self.bars_processed += 1;

        if self.phase != SessionPhase::Realtime {
            self.buffer.push(bar.clone());
        }

        if self.cooldown.is_enabled() {
            self.cooldown.check_exit(bar.timestamp, bar.close);
            self.cooldown.check_activation(&CooldownContext {
                now: bar.timestamp,
                price: bar.close,
                unrealized_pnl: account.unrealized_pnl,
                session_pnl: account.session_pnl,
            });
        }

        let Some(client) = self.remote_client() else {
            return Ok(TradeDecision::no_action());
        };

        let admission = self.gate.admit(&AdmissionContext {
            now: bar.timestamp,
            open_positions: account.open_positions,
            cooldown_active: self.cooldown.is_active(),
            breaker_tripped: self.breaker.is_tripped(),
        });
        if !admission.is_admitted() {
            debug!("Bar {} not admitted: {}", bar.timestamp, admission);
            return Ok(TradeDecision::no_action());
        }

        self.exchange(client, bar).await;

        if self.breaker.is_tripped() {
            return Ok(TradeDecision::no_action());
        }

        self.decide(bar).await
    }

    /// Send the bar and poll signals as one dispatched unit
    async fn exchange(&self, client: Arc<dyn PatternService>, bar: &Bar) {
        let instrument = self.instrument.clone();
        let cache = self.cache.clone();
        let bar = bar.clone();

        self.dispatcher
            .dispatch(self.dispatch_mode(), "bar exchange", async move {
                client.send_bar(&instrument, &bar).await?;
                let result = client.check_signals(&instrument).await?;
                cache.store(&instrument, result, Utc::now()).await;
                Ok(())
            })
            .await;
    }

    async fn decide(&mut self, bar: &Bar) -> Result<TradeDecision> {
        let Some(cached) = self.cache.get_fresh(&self.instrument, Utc::now()).await else {
            return Ok(TradeDecision::no_action());
        };

        // Each received result is scored once
        if self.last_signal_at == Some(cached.received_at) {
            return Ok(TradeDecision::no_action());
        }
        self.last_signal_at = Some(cached.received_at);

        let features = SignalFeatures::from_match_result(&cached.result);
        let decision = self.gate.evaluate(&features, bar.timestamp);

        if decision.is_entry() {
            self.entries_proposed += 1;
            info!(
                "Session {}: {} at {} (score {:.3}, pattern {:?})",
                self.session_id, decision.action, bar.close, decision.score, decision.pattern_id
            );
        }
        Ok(decision)
    }

    // =========================================================================
    // Trade outcomes and teardown
    // =========================================================================

    /// Record a closed trade and report it to the pattern service
    pub async fn on_trade_closed(&mut self, result: TradeResult) {
        self.tracker.record(&result);
        debug!(
            "Trade closed on {}: {:?} pnl {}",
            result.pattern_id,
            result.status(),
            result.pnl
        );

        let Some(client) = self.remote_client() else {
            return;
        };
        let instrument = self.instrument.clone();

        self.dispatcher
            .dispatch(self.dispatch_mode(), "trade result", async move {
                client.send_trade_result(&instrument, &result).await
            })
            .await;
    }

    /// Tear the session down exactly once.
    ///
    /// Flushes the performance summary under a bounded wait, disposes the client,
    /// releases the shared cache and clears in-memory state. Each step runs even
    /// if an earlier one failed. Repeated calls return `None`.
    pub async fn on_terminate(&mut self) -> Option<TerminationReport> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!("Session {} already terminated", self.session_id);
            return None;
        }

        info!("Terminating session {} from {}", self.session_id, self.phase);
        if self.phase != SessionPhase::Terminated {
            self.transitions
                .push(PhaseTransition::new(self.phase, SessionPhase::Terminated));
            self.phase = SessionPhase::Terminated;
        }

        let mut report = TerminationReport::default();

        // Final summary, bounded
        if let Some(client) = self.client.clone().filter(|_| self.config.remote.enabled) {
            let summary = self.tracker.summary(&self.session_id, &self.instrument);
            let outcome = self
                .dispatcher
                .run_critical(
                    "performance summary",
                    self.config.session.shutdown_flush_timeout(),
                    async move { client.send_performance_summary(&summary).await },
                )
                .await;
            report.flush = Some(outcome);
        }

        // Client
        if let Some(client) = self.client.take() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| client.dispose())) {
                Ok(()) => report.client_disposed = true,
                Err(panic) => error!("Client dispose panicked: {}", panic_message(panic.as_ref())),
            }
        }

        // Shared cache
        if self.cache_attached {
            self.cache_attached = false;
            match AssertUnwindSafe(self.cache.release(&self.instrument))
                .catch_unwind()
                .await
            {
                Ok(reset) => {
                    report.cache_released = true;
                    report.cache_reset = reset;
                }
                Err(panic) => error!("Cache release panicked: {}", panic_message(panic.as_ref())),
            }
        }

        // In-memory state; background calls are left to finish on their own
        report.detached_tasks = self.dispatcher.detach_all();
        self.buffer.clear();
        self.tracker.clear();
        self.gate.reset();
        self.cooldown.reset();
        self.last_signal_at = None;
        self.remote_enabled = false;
        self.connected.store(false, Ordering::SeqCst);

        info!(
            "Session {} terminated (errors: {}, detached calls: {})",
            self.session_id,
            self.breaker.error_count(),
            report.detached_tasks
        );
        Some(report)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session_id", &self.session_id)
            .field("instrument", &self.instrument)
            .field("phase", &self.phase)
            .field("remote_enabled", &self.remote_enabled)
            .field("errors", &self.breaker.error_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
