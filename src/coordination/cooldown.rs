//! Regime Protection Cooldown
//!
//! Suspends new entries after an abnormal loss. Entry is first-match-wins over
//! an open-position loss check and a session loss check; exit is an OR of an
//! elapsed-time trigger and a price-displacement trigger.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::CooldownConfig;

/// Why the cooldown was activated
#[derive(Debug, Clone, PartialEq)]
pub enum CooldownReason {
    /// Open position loss beyond a multiple of the stop size
    PositionLoss { loss: Decimal, limit: Decimal },
    /// Running session loss reached a fraction of the daily cap
    SessionLoss { loss: Decimal, limit: Decimal },
}

impl fmt::Display for CooldownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownReason::PositionLoss { loss, limit } => {
                write!(f, "position loss {} exceeds {}", loss, limit)
            }
            CooldownReason::SessionLoss { loss, limit } => {
                write!(f, "session loss {} reached {}", loss, limit)
            }
        }
    }
}

/// Cooldown state; start time and reference price only exist while active
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CooldownState {
    #[default]
    Inactive,
    Active {
        reason: CooldownReason,
        since: DateTime<Utc>,
        reference_price: Decimal,
    },
}

impl CooldownState {
    pub fn is_active(&self) -> bool {
        matches!(self, CooldownState::Active { .. })
    }
}

/// Per-bar inputs to the activation check
#[derive(Debug, Clone, Copy)]
pub struct CooldownContext {
    pub now: DateTime<Utc>,
    pub price: Decimal,
    /// Unrealized P&L of the open position (negative = loss)
    pub unrealized_pnl: Decimal,
    /// Running session P&L supplied by the host (negative = loss)
    pub session_pnl: Decimal,
}

/// Dual-trigger cooldown state machine
#[derive(Debug, Clone)]
pub struct CooldownGuard {
    config: CooldownConfig,
    enabled: bool,
    state: CooldownState,
    activations: u32,
}

impl CooldownGuard {
    pub fn new(config: CooldownConfig) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            enabled,
            state: CooldownState::Inactive,
            activations: 0,
        }
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn activations(&self) -> u32 {
        self.activations
    }

    /// Enable or disable the guard for the current phase.
    ///
    /// Never enables a guard that configuration turned off.
    pub fn set_enabled(&mut self, enabled: bool) {
        let enabled = enabled && self.config.enabled;
        if self.enabled != enabled {
            debug!("Cooldown guard {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    fn position_loss_limit(&self) -> Decimal {
        self.config.stop_size * self.config.position_loss_multiple
    }

    fn session_loss_limit(&self) -> Decimal {
        self.config.daily_loss_cap.abs() * self.config.daily_loss_fraction
    }

    /// Evaluate the activation conditions in order. Returns true if the cooldown
    /// became active in this call.
    pub fn check_activation(&mut self, ctx: &CooldownContext) -> bool {
        if !self.enabled || self.state.is_active() {
            return false;
        }

        let Some(reason) = self.first_trigger(ctx) else {
            return false;
        };

        warn!(
            "Cooldown ACTIVATED: {} (reference price {})",
            reason, ctx.price
        );
        self.state = CooldownState::Active {
            reason,
            since: ctx.now,
            reference_price: ctx.price,
        };
        self.activations += 1;
        true
    }

    fn first_trigger(&self, ctx: &CooldownContext) -> Option<CooldownReason> {
        let position_loss = -ctx.unrealized_pnl;
        let position_limit = self.position_loss_limit();
        if position_loss > position_limit {
            return Some(CooldownReason::PositionLoss {
                loss: position_loss,
                limit: position_limit,
            });
        }

        let session_loss = -ctx.session_pnl;
        let session_limit = self.session_loss_limit();
        if session_loss > Decimal::ZERO && session_loss >= session_limit {
            return Some(CooldownReason::SessionLoss {
                loss: session_loss,
                limit: session_limit,
            });
        }

        None
    }

    /// Returns true if the cooldown was released in this call.
    ///
    /// Either trigger alone is enough: elapsed minutes or price displacement.
    pub fn check_exit(&mut self, now: DateTime<Utc>, price: Decimal) -> bool {
        let CooldownState::Active {
            since,
            reference_price,
            ..
        } = &self.state
        else {
            return false;
        };

        let elapsed = now - *since;
        let displacement = (price - *reference_price).abs();

        let time_exit =
            self.config.exit_minutes > 0 && elapsed >= Duration::minutes(self.config.exit_minutes);
        let price_exit =
            self.config.exit_points > Decimal::ZERO && displacement >= self.config.exit_points;

        if !(time_exit || price_exit) {
            return false;
        }

        info!(
            "Cooldown DEACTIVATED after {}m, displacement {} ({})",
            elapsed.num_minutes(),
            displacement,
            if time_exit { "time" } else { "price" }
        );
        self.state = CooldownState::Inactive;
        true
    }

    pub fn reset(&mut self) {
        self.state = CooldownState::Inactive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn guard() -> CooldownGuard {
        CooldownGuard::new(CooldownConfig {
            enabled: true,
            stop_size: dec!(100),
            position_loss_multiple: dec!(3),
            daily_loss_cap: dec!(1000),
            daily_loss_fraction: dec!(0.8),
            exit_minutes: 15,
            exit_points: dec!(0.5),
        })
    }

    fn ctx(now: DateTime<Utc>, unrealized: Decimal, session: Decimal) -> CooldownContext {
        CooldownContext {
            now,
            price: dec!(5000),
            unrealized_pnl: unrealized,
            session_pnl: session,
        }
    }

    fn activated(start: DateTime<Utc>) -> CooldownGuard {
        let mut guard = guard();
        assert!(guard.check_activation(&ctx(start, dec!(-301), dec!(0))));
        guard
    }

    #[test]
    fn test_position_loss_activates() {
        let start = Utc::now();
        let mut guard = guard();

        assert!(!guard.check_activation(&ctx(start, dec!(-300), dec!(0))));
        assert!(guard.check_activation(&ctx(start, dec!(-300.01), dec!(0))));

        match guard.state() {
            CooldownState::Active {
                reason,
                since,
                reference_price,
            } => {
                assert!(matches!(reason, CooldownReason::PositionLoss { .. }));
                assert_eq!(*since, start);
                assert_eq!(*reference_price, dec!(5000));
            }
            CooldownState::Inactive => panic!("expected active cooldown"),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let mut guard = guard();
        // Both conditions hold; the position check is evaluated first
        guard.check_activation(&ctx(Utc::now(), dec!(-500), dec!(-900)));
        assert!(matches!(
            guard.state(),
            CooldownState::Active {
                reason: CooldownReason::PositionLoss { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_session_loss_activates() {
        let mut guard = guard();
        assert!(!guard.check_activation(&ctx(Utc::now(), dec!(0), dec!(-799))));
        assert!(guard.check_activation(&ctx(Utc::now(), dec!(0), dec!(-800))));
        assert!(matches!(
            guard.state(),
            CooldownState::Active {
                reason: CooldownReason::SessionLoss { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_exit_is_time_or_price() {
        let start = Utc::now();

        // 14 minutes, 0.6 points -> price trigger
        let mut guard = activated(start);
        assert!(guard.check_exit(start + Duration::minutes(14), dec!(5000.6)));
        assert!(!guard.is_active());

        // 16 minutes, 0.1 points -> time trigger
        let mut guard = activated(start);
        assert!(guard.check_exit(start + Duration::minutes(16), dec!(4999.9)));
        assert!(!guard.is_active());

        // 5 minutes, 0.1 points -> stays active
        let mut guard = activated(start);
        assert!(!guard.check_exit(start + Duration::minutes(5), dec!(5000.1)));
        assert!(guard.is_active());
    }

    #[test]
    fn test_exit_noop_when_inactive() {
        let mut guard = guard();
        assert!(!guard.check_exit(Utc::now(), dec!(1)));
        assert_eq!(guard.state(), &CooldownState::Inactive);
    }

    #[test]
    fn test_unchanged_state_when_no_exit() {
        let start = Utc::now();
        let mut guard = activated(start);
        let before = guard.state().clone();
        guard.check_exit(start + Duration::minutes(1), dec!(5000.2));
        assert_eq!(guard.state(), &before);
    }

    #[test]
    fn test_disabled_guard_never_activates() {
        let mut guard = guard();
        guard.set_enabled(false);
        assert!(!guard.check_activation(&ctx(Utc::now(), dec!(-10000), dec!(-10000))));
        assert_eq!(guard.activations(), 0);

        guard.set_enabled(true);
        assert!(guard.check_activation(&ctx(Utc::now(), dec!(-10000), dec!(0))));
    }

    #[test]
    fn test_config_disabled_stays_disabled() {
        let mut guard = CooldownGuard::new(CooldownConfig {
            enabled: false,
            ..Default::default()
        });
        guard.set_enabled(true);
        assert!(!guard.is_enabled());
    }
}
