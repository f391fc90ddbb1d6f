//! Session Error Circuit Breaker
//!
//! A single non-resetting error counter per session. Once the count exceeds the
//! configured threshold the breaker stays open until the session ends.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - remote calls allowed
    Closed,
    /// Error threshold exceeded - session stops proposing trades
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Session-scoped error circuit breaker
///
/// Shared between the bar callback and background remote calls, so every
/// counter is atomic.
#[derive(Debug)]
pub struct ErrorCircuitBreaker {
    threshold: u32,
    errors: AtomicU32,
    successes: AtomicU64,
    tripped: AtomicBool,
    last_error: Mutex<Option<String>>,
    tripped_at: Mutex<Option<DateTime<Utc>>>,
}

impl ErrorCircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_threshold(config.error_threshold)
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            threshold,
            errors: AtomicU32::new(0),
            successes: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
            last_error: Mutex::new(None),
            tripped_at: Mutex::new(None),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(&BreakerConfig::default())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CircuitState {
        if self.is_tripped() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Record a failure. Returns true if this failure tripped the breaker.
    pub fn record_failure(&self, reason: &str) -> bool {
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(reason.to_string());
        }

        warn!("Session error #{}: {}", errors, reason);

        if errors > self.threshold && !self.tripped.swap(true, Ordering::SeqCst) {
            if let Ok(mut at) = self.tripped_at.lock() {
                *at = Some(Utc::now());
            }
            error!(
                "Circuit breaker TRIPPED after {} errors (threshold {}); no further trades this session",
                errors, self.threshold
            );
            return true;
        }

        false
    }

    /// Successes are tracked for diagnostics only; they never reduce the count
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        debug!("Remote call succeeded");
    }

    /// Get circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            error_count: self.error_count(),
            threshold: self.threshold,
            successes: self.successes.load(Ordering::SeqCst),
            last_error: self.last_error.lock().ok().and_then(|l| l.clone()),
            tripped_at: self.tripped_at.lock().ok().and_then(|t| *t),
        }
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub error_count: u32,
    pub threshold: u32,
    pub successes: u64,
    pub last_error: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
}
