//! Session lifecycle
//!
//! One [`SessionController`] per strategy-instrument pairing. The host drives
//! it through [`HostEvent`]s or the per-phase transition functions.

pub mod backfill;
pub mod buffer;
pub mod controller;
pub mod host;
pub mod performance;

pub use backfill::{BackfillCoordinator, BackfillTrigger};
pub use buffer::HistoricalBuffer;
pub use controller::{SessionController, TerminationReport};
pub use host::HostEvent;
pub use performance::PerformanceTracker;

use serde::Serialize;

use crate::domain::SessionPhase;

/// Point-in-time diagnostics for the host
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub instrument: String,
    pub phase: SessionPhase,
    pub remote_enabled: bool,
    pub connected: bool,
    pub error_count: u32,
    pub breaker_tripped: bool,
    pub cooldown_active: bool,
    pub backfill_completed: bool,
    pub backfill_succeeded: bool,
    pub buffered_bars: usize,
    pub bars_processed: u64,
    pub entries_proposed: u64,
}
