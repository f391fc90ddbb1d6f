pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod services;
pub mod session;
pub mod strategy;

pub use adapters::{HttpClientFactory, HttpPatternClient, PatternService, PatternServiceFactory};
pub use config::AppConfig;
pub use coordination::{
    CircuitState, CommunicationDispatcher, CooldownGuard, DispatchMode, ErrorCircuitBreaker,
    FlushOutcome,
};
pub use domain::{AccountSnapshot, Bar, MatchResult, SessionPhase, TradeDecision, TradeResult};
pub use error::{GuardError, Result};
pub use services::SignalCache;
pub use session::{
    BackfillCoordinator, HistoricalBuffer, HostEvent, SessionController, SessionStatus,
    TerminationReport,
};
pub use strategy::{ExecutionMode, SignalGate};
