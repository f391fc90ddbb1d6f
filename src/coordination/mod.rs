//! Coordination layer for one trading session
//!
//! - Error circuit breaker, session-scoped and fail-closed
//! - Regime-protection cooldown guard
//! - Phase-aware dispatcher for remote calls

pub mod circuit_breaker;
pub mod cooldown;
pub mod dispatcher;

pub use circuit_breaker::{CircuitBreakerStats, CircuitState, ErrorCircuitBreaker};
pub use cooldown::{CooldownContext, CooldownGuard, CooldownReason, CooldownState};
pub use dispatcher::{CommunicationDispatcher, DispatchMode, DispatchStats, FlushOutcome};
