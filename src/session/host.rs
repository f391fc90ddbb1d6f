//! Host event surface
//!
//! The trading host reports lifecycle changes and bars as [`HostEvent`]s.
//! Errors are logged here and never propagate back into the host.

use serde::{Deserialize, Serialize};
use tracing::error;

use super::SessionController;
use crate::domain::{AccountSnapshot, Bar, TradeDecision, TradeResult};

/// Callbacks delivered by the trading host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    ConfigLoaded,
    EnterHistorical,
    EnterRealtime,
    Bar {
        bar: Bar,
        #[serde(default)]
        account: AccountSnapshot,
    },
    TradeClosed(TradeResult),
    Terminated,
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::ConfigLoaded => "config_loaded",
            HostEvent::EnterHistorical => "enter_historical",
            HostEvent::EnterRealtime => "enter_realtime",
            HostEvent::Bar { .. } => "bar",
            HostEvent::TradeClosed(_) => "trade_closed",
            HostEvent::Terminated => "terminated",
        }
    }
}

impl SessionController {
    /// Route one host event. Only bar events produce a decision.
    pub async fn handle(&mut self, event: HostEvent) -> Option<TradeDecision> {
        let name = event.name();

        let outcome = match event {
            HostEvent::ConfigLoaded => self.on_config_loaded().await,
            HostEvent::EnterHistorical => self.on_historical_enter().await,
            HostEvent::EnterRealtime => self.on_realtime_enter().await.map(|_| ()),
            HostEvent::Bar { bar, account } => {
                return Some(self.on_bar_update(&bar, &account).await);
            }
            HostEvent::TradeClosed(result) => {
                self.on_trade_closed(result).await;
                Ok(())
            }
            HostEvent::Terminated => {
                self.on_terminate().await;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!("Session {}: {} event rejected: {}", self.session_id(), name, e);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PatternService, PatternServiceFactory};
    use crate::config::{AppConfig, RemoteConfig};
    use crate::domain::SessionPhase;
    use crate::error::{GuardError, Result};
    use crate::services::SignalCache;
    use std::sync::Arc;

    struct NoRemote;

    impl PatternServiceFactory for NoRemote {
        fn connect(&self, _config: &RemoteConfig, _session_id: &str) -> Result<Arc<dyn PatternService>> {
            Err(GuardError::ClientUnavailable)
        }
    }

    fn session() -> SessionController {
        SessionController::new(
            "host-test",
            "NQ 06-25",
            AppConfig::default(),
            Arc::new(NoRemote),
            Arc::new(SignalCache::with_defaults()),
        )
    }

    #[tokio::test]
    async fn test_out_of_order_event_is_swallowed() {
        let mut session = session();
        assert_eq!(session.handle(HostEvent::EnterRealtime).await, None);
        assert_eq!(session.phase(), SessionPhase::Created);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let mut session = session();
        session.handle(HostEvent::ConfigLoaded).await;
        session.handle(HostEvent::EnterHistorical).await;
        session.handle(HostEvent::EnterRealtime).await;
        assert_eq!(session.phase(), SessionPhase::Realtime);

        session.handle(HostEvent::Terminated).await;
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(session.is_terminated());

        // Terminating twice is harmless
        session.handle(HostEvent::Terminated).await;
        assert_eq!(session.transitions().len(), 4);
    }

    #[test]
    fn test_event_json() {
        let event: HostEvent = serde_json::from_str(r#"{"event":"enter_realtime"}"#).unwrap();
        assert_eq!(event, HostEvent::EnterRealtime);
        assert_eq!(event.name(), "enter_realtime");
    }
}
