//! Signal gating
//!
//! Turns a remote match result into at most one trade decision per bar.
//!
//! ## Execution modes
//!
//! - `decay_weighted` - accumulated bull/bear strength with per-bar decay
//! - `regime_branching` - trend vs reversal regime, confirmed by a second pattern
//! - `threshold_voting` - one vote per pattern category
//! - `consensus` - all of the above, gated on an agreement fraction

pub mod gate;
pub mod scorers;

pub use gate::{Admission, AdmissionContext, GateStats, SignalGate};
pub use scorers::{
    BranchingScorer, Candidate, ConsensusScorer, DecayScorer, Scorer, SignalFeatures,
    VotingScorer,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GateConfig;

/// Scoring strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    DecayWeighted,
    RegimeBranching,
    ThresholdVoting,
    Consensus,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DecayWeighted => "decay_weighted",
            ExecutionMode::RegimeBranching => "regime_branching",
            ExecutionMode::ThresholdVoting => "threshold_voting",
            ExecutionMode::Consensus => "consensus",
        }
    }

    /// Build the scorer for this mode
    pub fn build_scorer(&self, config: &GateConfig) -> Box<dyn Scorer> {
        match self {
            ExecutionMode::DecayWeighted => Box::new(DecayScorer::from_config(config)),
            ExecutionMode::RegimeBranching => Box::new(BranchingScorer::new()),
            ExecutionMode::ThresholdVoting => Box::new(VotingScorer::new(config.min_votes)),
            ExecutionMode::Consensus => Box::new(ConsensusScorer::from_config(config)),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ExecutionMode {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "decay_weighted" | "decay" => Ok(ExecutionMode::DecayWeighted),
            "regime_branching" | "branching" => Ok(ExecutionMode::RegimeBranching),
            "threshold_voting" | "voting" => Ok(ExecutionMode::ThresholdVoting),
            "consensus" | "execute_all" => Ok(ExecutionMode::Consensus),
            _ => Err(format!("Unknown execution mode: {}", s)),
        }
    }
}
