use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::GateConfig;
use crate::domain::{Direction, MatchResult, PatternMatch, PatternRegime};

/// Per-bar input shared by every scorer
#[derive(Debug, Clone, Default)]
pub struct SignalFeatures {
    pub matches: Vec<PatternMatch>,
    pub bull_strength: f64,
    pub bear_strength: f64,
    /// Overall score reported by the remote service
    pub remote_score: f64,
    pub signal_type: Option<String>,
}

impl SignalFeatures {
    pub fn from_match_result(result: &MatchResult) -> Self {
        Self {
            matches: result.matches.clone(),
            bull_strength: result.bull_strength,
            bear_strength: result.bear_strength,
            remote_score: result.score,
            signal_type: result.signal_type.clone(),
        }
    }

    /// Strongest match in `direction`, optionally restricted to a regime
    fn strongest(&self, direction: Direction, regime: Option<PatternRegime>) -> Option<&PatternMatch> {
        self.matches
            .iter()
            .filter(|m| m.direction == direction)
            .filter(|m| regime.map_or(true, |r| m.regime == r))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// A scored but not yet gated trade idea
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub direction: Direction,
    pub score: f64,
    pub stop: Option<Decimal>,
    pub target: Option<Decimal>,
    pub pattern_id: Option<String>,
    /// Scorer that produced the candidate
    pub source: &'static str,
}

impl Candidate {
    fn from_pattern(source: &'static str, direction: Direction, score: f64, lead: Option<&PatternMatch>) -> Self {
        Self {
            direction,
            score,
            stop: lead.and_then(|m| m.stop),
            target: lead.and_then(|m| m.target),
            pattern_id: lead.map(|m| m.id.clone()),
            source,
        }
    }
}

/// A scoring strategy over [`SignalFeatures`]
///
/// Scorers may carry state across bars (the decay scorer does), hence `&mut self`.
pub trait Scorer: Send {
    fn name(&self) -> &'static str;

    /// Score one bar, returning at most one candidate
    fn score(&mut self, features: &SignalFeatures) -> Option<Candidate>;

    /// Drop any state carried across bars
    fn reset(&mut self) {}
}

// =============================================================================
// Decay-weighted
// =============================================================================

/// Accumulates bull and bear strength with multiplicative decay per bar
#[derive(Debug, Clone)]
pub struct DecayScorer {
    decay_rate: f64,
    entry_strength: f64,
    skew: f64,
    bull: f64,
    bear: f64,
}

impl DecayScorer {
    pub fn new(decay_rate: f64, entry_strength: f64, skew: f64) -> Self {
        Self {
            decay_rate,
            entry_strength,
            skew,
            bull: 0.0,
            bear: 0.0,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.decay_rate, config.decay_entry_strength, config.decay_skew)
    }

    pub fn strengths(&self) -> (f64, f64) {
        (self.bull, self.bear)
    }
}

impl Scorer for DecayScorer {
    fn name(&self) -> &'static str {
        "decay_weighted"
    }

    fn score(&mut self, features: &SignalFeatures) -> Option<Candidate> {
        self.bull *= self.decay_rate;
        self.bear *= self.decay_rate;

        for m in &features.matches {
            match m.direction {
                Direction::Long => self.bull += m.confidence,
                Direction::Short => self.bear += m.confidence,
            }
        }

        let (direction, dominant, other) = if self.bull >= self.bear {
            (Direction::Long, self.bull, self.bear)
        } else {
            (Direction::Short, self.bear, self.bull)
        };

        let total = dominant + other;
        if total <= 0.0 || dominant < self.entry_strength || dominant < other * self.skew {
            return None;
        }

        let score = dominant / total;
        debug!(
            "Decay scorer fired {} (bull={:.3}, bear={:.3})",
            direction, self.bull, self.bear
        );

        let candidate = Candidate::from_pattern(
            self.name(),
            direction,
            score,
            features.strongest(direction, None),
        );

        // Strength is spent on entry
        self.reset();
        Some(candidate)
    }

    fn reset(&mut self) {
        self.bull = 0.0;
        self.bear = 0.0;
    }
}

// =============================================================================
// Regime-branching
// =============================================================================

/// Picks trend or reversal by majority, then requires a same-direction confirmation
#[derive(Debug, Clone, Default)]
pub struct BranchingScorer;

impl BranchingScorer {
    pub fn new() -> Self {
        Self
    }
}

impl Scorer for BranchingScorer {
    fn name(&self) -> &'static str {
        "regime_branching"
    }

    fn score(&mut self, features: &SignalFeatures) -> Option<Candidate> {
        let count = |regime| features.matches.iter().filter(|m| m.regime == regime).count();
        let trend = count(PatternRegime::Trend);
        let reversal = count(PatternRegime::Reversal);

        let regime = match trend.cmp(&reversal) {
            std::cmp::Ordering::Greater => PatternRegime::Trend,
            std::cmp::Ordering::Less => PatternRegime::Reversal,
            std::cmp::Ordering::Equal => return None,
        };

        let primary = features
            .matches
            .iter()
            .filter(|m| m.regime == regime)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        let confirmation = features.strongest(primary.direction, Some(PatternRegime::Confirmation))?;

        let score = (primary.confidence + confirmation.confidence) / 2.0;
        Some(Candidate::from_pattern(
            self.name(),
            primary.direction,
            score,
            Some(primary),
        ))
    }
}

// =============================================================================
// Threshold-voting
// =============================================================================

/// One vote per pattern category, cast by its strongest match
#[derive(Debug, Clone)]
pub struct VotingScorer {
    min_votes: usize,
}

impl VotingScorer {
    pub fn new(min_votes: usize) -> Self {
        Self {
            min_votes: min_votes.max(1),
        }
    }
}

impl Scorer for VotingScorer {
    fn name(&self) -> &'static str {
        "threshold_voting"
    }

    fn score(&mut self, features: &SignalFeatures) -> Option<Candidate> {
        let mut leaders: BTreeMap<&str, &PatternMatch> = BTreeMap::new();
        for m in &features.matches {
            leaders
                .entry(m.category.as_str())
                .and_modify(|lead| {
                    if m.confidence > lead.confidence {
                        *lead = m;
                    }
                })
                .or_insert(m);
        }

        let total = leaders.len();
        let (long, short): (Vec<&PatternMatch>, Vec<&PatternMatch>) = leaders
            .values()
            .copied()
            .partition(|m| m.direction == Direction::Long);

        let (direction, agreeing) = if long.len() > short.len() {
            (Direction::Long, long)
        } else if short.len() > long.len() {
            (Direction::Short, short)
        } else {
            return None;
        };

        if agreeing.len() < self.min_votes || agreeing.len() * 2 <= total {
            return None;
        }

        let score = agreeing.iter().map(|m| m.confidence).sum::<f64>() / agreeing.len() as f64;
        let lead = agreeing
            .iter()
            .copied()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        Some(Candidate::from_pattern(self.name(), direction, score, lead))
    }
}

// =============================================================================
// Consensus
// =============================================================================

/// Runs every other scorer and requires a minimum agreeing fraction
pub struct ConsensusScorer {
    scorers: Vec<Box<dyn Scorer>>,
    fraction: f64,
}

impl ConsensusScorer {
    pub fn new(scorers: Vec<Box<dyn Scorer>>, fraction: f64) -> Self {
        Self { scorers, fraction }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            vec![
                Box::new(DecayScorer::from_config(config)),
                Box::new(BranchingScorer::new()),
                Box::new(VotingScorer::new(config.min_votes)),
            ],
            config.consensus_fraction,
        )
    }
}

impl Scorer for ConsensusScorer {
    fn name(&self) -> &'static str {
        "consensus"
    }

    fn score(&mut self, features: &SignalFeatures) -> Option<Candidate> {
        if self.scorers.is_empty() {
            return None;
        }

        let candidates: Vec<Candidate> = self
            .scorers
            .iter_mut()
            .filter_map(|s| s.score(features))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        let emitted = candidates.len();

        let (long, short): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| c.direction == Direction::Long);

        let agreeing = match long.len().cmp(&short.len()) {
            std::cmp::Ordering::Greater => long,
            std::cmp::Ordering::Less => short,
            std::cmp::Ordering::Equal => return None,
        };

        // Agreement is measured against the scorers that produced a candidate
        let agreement = agreeing.len() as f64 / emitted as f64;
        if agreement < self.fraction {
            debug!(
                "Consensus below fraction: {:.2} < {:.2}",
                agreement, self.fraction
            );
            return None;
        }

        let best = agreeing
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))?;

        Some(Candidate {
            source: self.name(),
            ..best
        })
    }

    fn reset(&mut self) {
        for scorer in &mut self.scorers {
            scorer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pattern(
        id: &str,
        category: &str,
        regime: PatternRegime,
        direction: Direction,
        confidence: f64,
    ) -> PatternMatch {
        PatternMatch {
            id: id.to_string(),
            name: id.to_string(),
            category: category.to_string(),
            regime,
            direction,
            confidence,
            stop: Some(dec!(10)),
            target: Some(dec!(20)),
        }
    }

    fn features(matches: Vec<PatternMatch>) -> SignalFeatures {
        SignalFeatures {
            matches,
            ..Default::default()
        }
    }

    #[test]
    fn test_decay_accumulates_until_entry_strength() {
        let mut scorer = DecayScorer::new(0.95, 1.5, 1.5);
        let bar = features(vec![pattern("p1", "wick", PatternRegime::Trend, Direction::Long, 0.8)]);

        assert!(scorer.score(&bar).is_none());
        let candidate = scorer.score(&bar).unwrap();
        assert_eq!(candidate.direction, Direction::Long);
        assert_eq!(candidate.pattern_id.as_deref(), Some("p1"));
        assert_eq!(candidate.stop, Some(dec!(10)));
        // Strength is spent after firing
        assert_eq!(scorer.strengths(), (0.0, 0.0));
    }

    #[test]
    fn test_decay_requires_skew() {
        let mut scorer = DecayScorer::new(1.0, 1.0, 1.5);
        let bar = features(vec![
            pattern("l", "a", PatternRegime::Trend, Direction::Long, 1.2),
            pattern("s", "b", PatternRegime::Trend, Direction::Short, 1.0),
        ]);
        // 1.2 < 1.0 * 1.5
        assert!(scorer.score(&bar).is_none());
    }

    #[test]
    fn test_decay_applies_rate() {
        let mut scorer = DecayScorer::new(0.5, 10.0, 1.5);
        scorer.score(&features(vec![pattern("p", "a", PatternRegime::Trend, Direction::Short, 1.0)]));
        scorer.score(&features(vec![]));
        assert_eq!(scorer.strengths(), (0.0, 0.5));
    }

    #[test]
    fn test_decay_without_strength_never_fires() {
        let mut scorer = DecayScorer::new(0.95, 0.0, 1.5);
        assert!(scorer.score(&features(vec![])).is_none());
    }

    #[test]
    fn test_branching_requires_confirmation() {
        let mut scorer = BranchingScorer::new();
        let unconfirmed = features(vec![
            pattern("r1", "a", PatternRegime::Reversal, Direction::Short, 0.9),
            pattern("c1", "b", PatternRegime::Confirmation, Direction::Long, 0.8),
        ]);
        assert!(scorer.score(&unconfirmed).is_none());

        let confirmed = features(vec![
            pattern("r1", "a", PatternRegime::Reversal, Direction::Short, 0.9),
            pattern("c1", "b", PatternRegime::Confirmation, Direction::Short, 0.7),
        ]);
        let candidate = scorer.score(&confirmed).unwrap();
        assert_eq!(candidate.direction, Direction::Short);
        assert_eq!(candidate.pattern_id.as_deref(), Some("r1"));
        assert!((candidate.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_branching_tie_yields_nothing() {
        let mut scorer = BranchingScorer::new();
        let tied = features(vec![
            pattern("t1", "a", PatternRegime::Trend, Direction::Long, 0.9),
            pattern("r1", "b", PatternRegime::Reversal, Direction::Short, 0.9),
            pattern("c1", "c", PatternRegime::Confirmation, Direction::Long, 0.9),
        ]);
        assert!(scorer.score(&tied).is_none());
    }

    #[test]
    fn test_voting_one_vote_per_category() {
        let mut scorer = VotingScorer::new(2);
        // Two long matches in the same category only count once
        let same_category = features(vec![
            pattern("a1", "ema", PatternRegime::Trend, Direction::Long, 0.9),
            pattern("a2", "ema", PatternRegime::Trend, Direction::Long, 0.8),
        ]);
        assert!(scorer.score(&same_category).is_none());

        let agreeing = features(vec![
            pattern("a1", "ema", PatternRegime::Trend, Direction::Long, 0.9),
            pattern("b1", "wick", PatternRegime::Reversal, Direction::Long, 0.7),
            pattern("c1", "volume", PatternRegime::Neutral, Direction::Short, 0.6),
        ]);
        let candidate = scorer.score(&agreeing).unwrap();
        assert_eq!(candidate.direction, Direction::Long);
        assert!((candidate.score - 0.8).abs() < 1e-9);
        assert_eq!(candidate.pattern_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_voting_needs_majority() {
        let mut scorer = VotingScorer::new(2);
        let split = features(vec![
            pattern("a", "ema", PatternRegime::Trend, Direction::Long, 0.9),
            pattern("b", "wick", PatternRegime::Trend, Direction::Long, 0.9),
            pattern("c", "volume", PatternRegime::Trend, Direction::Short, 0.9),
            pattern("d", "gap", PatternRegime::Trend, Direction::Short, 0.9),
        ]);
        assert!(scorer.score(&split).is_none());
    }

    struct Fixed(Option<Candidate>);

    impl Scorer for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn score(&mut self, _features: &SignalFeatures) -> Option<Candidate> {
            self.0.clone()
        }
    }

    fn fixed(direction: Direction, score: f64) -> Box<dyn Scorer> {
        Box::new(Fixed(Some(Candidate {
            direction,
            score,
            stop: None,
            target: Some(Decimal::from((score * 100.0) as i64)),
            pattern_id: None,
            source: "fixed",
        })))
    }

    #[test]
    fn test_consensus_counts_only_emitting_scorers() {
        let mut consensus = ConsensusScorer::new(
            vec![fixed(Direction::Long, 0.9), Box::new(Fixed(None)), Box::new(Fixed(None))],
            0.5,
        );
        // The single candidate is unanimous among scorers that fired
        let candidate = consensus.score(&SignalFeatures::default()).unwrap();
        assert_eq!(candidate.direction, Direction::Long);
        assert_eq!(candidate.score, 0.9);

        let mut silent = ConsensusScorer::new(vec![Box::new(Fixed(None)), Box::new(Fixed(None))], 0.1);
        assert!(silent.score(&SignalFeatures::default()).is_none());
    }

    #[test]
    fn test_consensus_fraction() {
        let mut consensus = ConsensusScorer::new(
            vec![
                fixed(Direction::Long, 0.6),
                fixed(Direction::Long, 0.7),
                fixed(Direction::Short, 0.8),
            ],
            0.6,
        );
        // 2 of 3 agree
        assert!(consensus.score(&SignalFeatures::default()).is_some());

        let mut strict = ConsensusScorer::new(
            vec![
                fixed(Direction::Long, 0.6),
                fixed(Direction::Long, 0.7),
                fixed(Direction::Short, 0.8),
            ],
            0.7,
        );
        assert!(strict.score(&SignalFeatures::default()).is_none());
    }

    #[test]
    fn test_consensus_takes_best_agreeing_candidate() {
        let mut consensus = ConsensusScorer::new(
            vec![
                fixed(Direction::Short, 0.6),
                fixed(Direction::Short, 0.9),
                fixed(Direction::Long, 0.99),
            ],
            0.3,
        );
        let candidate = consensus.score(&SignalFeatures::default()).unwrap();
        assert_eq!(candidate.direction, Direction::Short);
        assert_eq!(candidate.score, 0.9);
        assert_eq!(candidate.target, Some(dec!(90)));
        assert_eq!(candidate.source, "consensus");
    }

    #[test]
    fn test_consensus_conflict_yields_nothing() {
        let mut consensus = ConsensusScorer::new(
            vec![fixed(Direction::Short, 0.9), fixed(Direction::Long, 0.9)],
            0.3,
        );
        assert!(consensus.score(&SignalFeatures::default()).is_none());
    }
}
