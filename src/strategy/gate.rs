use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::{debug, info};

use super::{Candidate, ExecutionMode, Scorer, SignalFeatures};
use crate::config::GateConfig;
use crate::domain::{TradeAction, TradeDecision};

/// Inputs to the pre-scoring admission checks
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext {
    pub now: DateTime<Utc>,
    pub open_positions: u32,
    pub cooldown_active: bool,
    pub breaker_tripped: bool,
}

/// Outcome of the admission checks, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    BreakerTripped,
    CooldownActive,
    PositionCeiling,
    Throttled,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admitted => write!(f, "admitted"),
            Admission::BreakerTripped => write!(f, "circuit breaker tripped"),
            Admission::CooldownActive => write!(f, "cooldown active"),
            Admission::PositionCeiling => write!(f, "position ceiling reached"),
            Admission::Throttled => write!(f, "minimum spacing not elapsed"),
        }
    }
}

/// Gate statistics
#[derive(Debug, Clone, Default)]
pub struct GateStats {
    pub evaluated: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub last_accepted: Option<DateTime<Utc>>,
}

/// Selects a scorer by execution mode and gates its candidate on a confidence threshold
pub struct SignalGate {
    mode: ExecutionMode,
    scorer: Box<dyn Scorer>,
    threshold: f64,
    max_positions: u32,
    min_spacing: Duration,
    stats: GateStats,
}

impl SignalGate {
    pub fn new(config: &GateConfig) -> Self {
        Self::with_scorer(config, config.mode.build_scorer(config))
    }

    /// Build a gate around an explicit scorer
    pub fn with_scorer(config: &GateConfig, scorer: Box<dyn Scorer>) -> Self {
        Self {
            mode: config.mode,
            scorer,
            threshold: config.confidence_threshold,
            max_positions: config.max_positions,
            min_spacing: Duration::seconds(config.min_spacing_secs),
            stats: GateStats::default(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    /// Checks that must pass before any remote call is attempted
    pub fn admit(&self, ctx: &AdmissionContext) -> Admission {
        if ctx.breaker_tripped {
            return Admission::BreakerTripped;
        }

        if ctx.cooldown_active {
            return Admission::CooldownActive;
        }

        if self.max_positions > 0 && ctx.open_positions >= self.max_positions {
            return Admission::PositionCeiling;
        }

        if let Some(last) = self.stats.last_accepted {
            if ctx.now - last < self.min_spacing {
                return Admission::Throttled;
            }
        }

        Admission::Admitted
    }

    /// Run the configured scorer once and gate the result
    pub fn evaluate(&mut self, features: &SignalFeatures, now: DateTime<Utc>) -> TradeDecision {
        self.stats.evaluated += 1;

        match self.scorer.score(features) {
            Some(candidate) => self.promote(candidate, now),
            None => TradeDecision::no_action(),
        }
    }

    /// Promote a candidate to a decision if its score meets the threshold (inclusive).
    /// Non-finite scores never pass.
    pub fn promote(&mut self, candidate: Candidate, now: DateTime<Utc>) -> TradeDecision {
        if !candidate.score.is_finite() || candidate.score < self.threshold {
            self.stats.rejected += 1;
            info!(
                "Rejected {} candidate from {}: score {:.3} < threshold {:.3}",
                candidate.direction, candidate.source, candidate.score, self.threshold
            );
            return TradeDecision::no_action();
        }

        self.stats.accepted += 1;
        self.stats.last_accepted = Some(now);
        debug!(
            "Accepted {} candidate from {} with score {:.3}",
            candidate.direction, candidate.source, candidate.score
        );

        TradeDecision {
            action: TradeAction::from(candidate.direction),
            score: candidate.score,
            stop: candidate.stop,
            target: candidate.target,
            pattern_id: candidate.pattern_id,
        }
    }

    pub fn reset(&mut self) {
        self.scorer.reset();
        self.stats = GateStats::default();
    }
}

impl fmt::Debug for SignalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalGate")
            .field("mode", &self.mode)
            .field("scorer", &self.scorer.name())
            .field("threshold", &self.threshold)
            .field("stats", &self.stats)
            .finish()
    }
}
