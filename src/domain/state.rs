use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session object exists, nothing loaded
    Created,
    /// Configuration loaded, remote client constructed (or degraded)
    ConfigLoaded,
    /// Replaying saved data
    Historical,
    /// Observing live data
    Realtime,
    /// Torn down
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Created => "CREATED",
            SessionPhase::ConfigLoaded => "CONFIG_LOADED",
            SessionPhase::Historical => "HISTORICAL",
            SessionPhase::Realtime => "REALTIME",
            SessionPhase::Terminated => "TERMINATED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, target) {
            (Created, ConfigLoaded) => true,

            // Replay or live is chosen once
            (ConfigLoaded, Historical) => true,
            (ConfigLoaded, Realtime) => true,

            // Warm-up replay hands over to live
            (Historical, Realtime) => true,

            // Termination is reachable from anywhere but itself
            (Terminated, Terminated) => false,
            (_, Terminated) => true,

            _ => false,
        }
    }

    /// Get valid next phases from the current phase
    pub fn valid_transitions(&self) -> Vec<SessionPhase> {
        use SessionPhase::*;

        match self {
            Created => vec![ConfigLoaded, Terminated],
            ConfigLoaded => vec![Historical, Realtime, Terminated],
            Historical => vec![Realtime, Terminated],
            Realtime => vec![Terminated],
            Terminated => vec![],
        }
    }

    /// Phases in which bars may arrive
    pub fn accepts_bars(&self) -> bool {
        matches!(
            self,
            SessionPhase::ConfigLoaded | SessionPhase::Historical | SessionPhase::Realtime
        )
    }

    /// Remote calls in this phase are awaited in bar order
    pub fn is_replay(&self) -> bool {
        matches!(self, SessionPhase::Historical)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Terminated)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SessionPhase {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(SessionPhase::Created),
            "CONFIG_LOADED" => Ok(SessionPhase::ConfigLoaded),
            "HISTORICAL" => Ok(SessionPhase::Historical),
            "REALTIME" => Ok(SessionPhase::Realtime),
            "TERMINATED" => Ok(SessionPhase::Terminated),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

/// Phase transition event (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PhaseTransition {
    pub fn new(from: SessionPhase, to: SessionPhase) -> Self {
        Self {
            from,
            to,
            timestamp: chrono::Utc::now(),
        }
    }
}
